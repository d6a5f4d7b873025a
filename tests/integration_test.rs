//! Smoke tests against a running server.
//!
//! Ignored by default. Start the service and run with
//! `BASE_URL=http://localhost:8000 cargo test -- --ignored`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct IngestResponse {
    status: String,
    reading_id: i64,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Reading {
    id: i64,
    soil_moisture: f64,
    soil_temperature: f64,
    phosphorus_present: bool,
    potassium_present: bool,
    pump_on: bool,
}

#[derive(Debug, Deserialize)]
struct Integrated {
    reading_id: i64,
    soil_temperature: f64,
    ambient_temperature: f64,
    temperature_gap: f64,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into())
}

#[tokio::test]
#[ignore = "needs a running server at BASE_URL"]
async fn device_query_ingest_is_stored_and_enriched() -> Result<()> {
    // ---
    let base = base_url();
    let client = Client::new();

    let url = format!(
        "{}/data?umidade=65.5&temperatura=24.2&ph=6.8&fosforo=presente&potassio=ausente&rele=0",
        base
    );
    let response = client.get(&url).send().await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored: IngestResponse = response.json().await?;
    assert_eq!(stored.status, "stored");
    assert!(stored.received_at <= Utc::now());

    let readings: Vec<Reading> = client
        .get(format!("{}/readings?limit=5", base))
        .send()
        .await?
        .json()
        .await?;
    let reading = readings
        .iter()
        .find(|r| r.id == stored.reading_id)
        .expect("new reading listed");
    assert_eq!(reading.soil_moisture, 65.5);
    assert_eq!(reading.soil_temperature, 24.2);
    assert!(reading.phosphorus_present);
    assert!(!reading.potassium_present);
    assert!(!reading.pump_on);

    // Enrichment runs in the background; give it a moment.
    let mut enriched = None;
    for _ in 0..20 {
        let rows: Vec<Integrated> = client
            .get(format!("{}/integrated?limit=20", base))
            .send()
            .await?
            .json()
            .await?;
        if let Some(row) = rows.into_iter().find(|r| r.reading_id == stored.reading_id) {
            enriched = Some(row);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
    let row = enriched.expect("reading enriched within 5s");
    let expected_gap = ((row.ambient_temperature - row.soil_temperature) * 100.0).round() / 100.0;
    assert!((row.temperature_gap - expected_gap).abs() < 1e-9);

    Ok(())
}

#[tokio::test]
#[ignore = "needs a running server at BASE_URL"]
async fn missing_field_is_rejected() -> Result<()> {
    // ---
    let url = format!("{}/data?umidade=40&temperatura=20", base_url());
    let response = Client::new().get(&url).send().await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "validation_error");
    Ok(())
}

#[tokio::test]
#[ignore = "needs a running server at BASE_URL"]
async fn health_reports_pool() -> Result<()> {
    // ---
    let body: serde_json::Value = Client::new()
        .get(format!("{}/health", base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    assert!(body["pool"]["max"].as_u64().unwrap_or(0) >= 1);
    Ok(())
}
