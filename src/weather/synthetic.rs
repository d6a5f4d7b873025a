//! Time-of-day weather model used when no live source answers.
//!
//! Stateless: every value is a function of the field's local hour plus
//! uniform noise drawn from the supplied RNG, so tests can seed it.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::derive::{round1, round2};
use crate::models::WeatherSnapshot;

pub const SOURCE_LABEL: &str = "synthetic";

const COMPASS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

pub const STORM_CONDITIONS: [&str; 2] = ["Thunderstorm", "Heavy rain"];
pub const LIGHT_RAIN_CONDITIONS: [&str; 3] = ["Light rain", "Drizzle", "Showers"];
pub const HOT_CONDITIONS: [&str; 2] = ["Sunny", "Hot and clear"];
pub const OVERCAST_CONDITIONS: [&str; 2] = ["Overcast", "Cloudy"];
pub const MILD_CONDITIONS: [&str; 3] = ["Partly cloudy", "Clear sky", "Sunny"];

/// Broad class of a synthesized condition, used for UV and visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionClass {
    Storm,
    LightRain,
    Hot,
    Overcast,
    Mild,
}

impl ConditionClass {
    pub fn classify(rain_amount: f64, temperature: f64, humidity: f64) -> Self {
        if rain_amount > 2.0 {
            ConditionClass::Storm
        } else if rain_amount > 0.0 {
            ConditionClass::LightRain
        } else if temperature > 30.0 {
            ConditionClass::Hot
        } else if humidity > 80.0 {
            ConditionClass::Overcast
        } else {
            ConditionClass::Mild
        }
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            ConditionClass::Storm => &STORM_CONDITIONS,
            ConditionClass::LightRain => &LIGHT_RAIN_CONDITIONS,
            ConditionClass::Hot => &HOT_CONDITIONS,
            ConditionClass::Overcast => &OVERCAST_CONDITIONS,
            ConditionClass::Mild => &MILD_CONDITIONS,
        }
    }
}

/// Synthetic weather generator for one field.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticWeather {
    field_offset: FixedOffset,
}

impl SyntheticWeather {
    pub fn new(field_offset: FixedOffset) -> Self {
        Self { field_offset }
    }

    /// Synthesize a snapshot for `now`.
    pub fn generate<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> WeatherSnapshot {
        // ---
        let hour = now.with_timezone(&self.field_offset).hour();

        let ambient_temperature = round1(base_temperature(hour) + temperature_offset(hour, rng));

        let ambient_humidity =
            round1((85.0 - (ambient_temperature - 22.0) * 2.0 + rng.gen_range(-5.0..=5.0)).clamp(45.0, 95.0));

        let pressure = round2(1013.25 + rng.gen_range(-15.0..=15.0));

        let wind_speed = round1(if (10..=16).contains(&hour) {
            rng.gen_range(8.0..=18.0)
        } else {
            rng.gen_range(3.0..=12.0)
        });

        let rain_probability = round1(if ambient_humidity > 80.0 && pressure < 1010.0 {
            rng.gen_range(60.0..=95.0)
        } else if ambient_humidity > 70.0 {
            rng.gen_range(20.0..=60.0)
        } else {
            rng.gen_range(0.0..=20.0)
        });

        let rain_amount = round2(if rain_probability > 70.0 {
            rng.gen_range(0.5..=8.0)
        } else if rain_probability > 40.0 {
            rng.gen_range(0.0..=2.0)
        } else {
            0.0
        });

        let class = ConditionClass::classify(rain_amount, ambient_temperature, ambient_humidity);
        let condition = class.labels().choose(rng).copied().unwrap_or("Clear sky");
        let wind_direction = COMPASS.choose(rng).copied().unwrap_or("N");

        WeatherSnapshot {
            collected_at: now,
            ambient_temperature,
            ambient_humidity,
            pressure,
            wind_speed,
            wind_direction: wind_direction.to_string(),
            condition: condition.to_string(),
            rain_probability,
            rain_amount,
            uv_index: Some(round1(uv_index(hour, class, rng))),
            visibility: Some(round1(visibility(class, rng))),
            source_label: SOURCE_LABEL.to_string(),
        }
    }
}

fn base_temperature(hour: u32) -> f64 {
    match hour {
        6..=11 => 24.0,
        12..=17 => 29.0,
        18..=21 => 26.0,
        _ => 22.0,
    }
}

fn temperature_offset<R: Rng + ?Sized>(hour: u32, rng: &mut R) -> f64 {
    match hour {
        6..=11 => rng.gen_range(-2.0..=3.0),
        12..=17 => rng.gen_range(-3.0..=4.0),
        18..=21 => rng.gen_range(-2.0..=2.0),
        _ => rng.gen_range(-1.0..=2.0),
    }
}

fn uv_index<R: Rng + ?Sized>(hour: u32, class: ConditionClass, rng: &mut R) -> f64 {
    // ---
    let base = match hour {
        10..=15 => rng.gen_range(6.0..=11.0),
        6..=18 => rng.gen_range(2.0..=6.0),
        _ => 0.0,
    };
    let damping = match class {
        ConditionClass::Storm | ConditionClass::LightRain => 0.4,
        ConditionClass::Overcast => 0.6,
        ConditionClass::Hot | ConditionClass::Mild => 1.0,
    };
    base * damping
}

fn visibility<R: Rng + ?Sized>(class: ConditionClass, rng: &mut R) -> f64 {
    match class {
        ConditionClass::Storm => rng.gen_range(2.0..=5.0),
        ConditionClass::LightRain => rng.gen_range(5.0..=10.0),
        ConditionClass::Overcast => rng.gen_range(8.0..=15.0),
        ConditionClass::Hot | ConditionClass::Mild => rng.gen_range(15.0..=25.0),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, hour, 30, 0).unwrap()
    }

    fn model() -> SyntheticWeather {
        SyntheticWeather::new(FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn test_temperature_stays_in_hour_bucket() {
        // ---
        let mut rng = StdRng::seed_from_u64(7);
        let buckets = [(8, 22.0, 27.0), (14, 26.0, 33.0), (20, 24.0, 28.0), (2, 21.0, 24.0)];
        for (hour, low, high) in buckets {
            for _ in 0..500 {
                let s = model().generate(at_hour(hour), &mut rng);
                assert!(
                    (low..=high).contains(&s.ambient_temperature),
                    "hour {hour}: {} outside [{low}, {high}]",
                    s.ambient_temperature
                );
            }
        }
    }

    #[test]
    fn test_value_ranges_hold() {
        // ---
        let mut rng = StdRng::seed_from_u64(11);
        for hour in 0..24 {
            for _ in 0..200 {
                let s = model().generate(at_hour(hour), &mut rng);
                assert!((45.0..=95.0).contains(&s.ambient_humidity));
                assert!((1013.25 - 15.0..=1013.25 + 15.0).contains(&s.pressure));
                assert!((0.0..=95.0).contains(&s.rain_probability));
                assert!((0.0..=8.0).contains(&s.rain_amount));
                if (10..=16).contains(&hour) {
                    assert!((8.0..=18.0).contains(&s.wind_speed));
                } else {
                    assert!((3.0..=12.0).contains(&s.wind_speed));
                }
                if s.rain_probability <= 40.0 {
                    assert_eq!(s.rain_amount, 0.0);
                }
                assert!(COMPASS.contains(&s.wind_direction.as_str()));
                assert_eq!(s.source_label, SOURCE_LABEL);
            }
        }
    }

    #[test]
    fn test_condition_matches_class() {
        // ---
        let mut rng = StdRng::seed_from_u64(3);
        for hour in 0..24 {
            for _ in 0..200 {
                let s = model().generate(at_hour(hour), &mut rng);
                let class = ConditionClass::classify(s.rain_amount, s.ambient_temperature, s.ambient_humidity);
                assert!(class.labels().contains(&s.condition.as_str()));
                if hour < 6 || hour > 18 {
                    assert_eq!(s.uv_index, Some(0.0));
                }
            }
        }
    }

    #[test]
    fn test_classify_precedence() {
        // ---
        assert_eq!(ConditionClass::classify(2.5, 35.0, 90.0), ConditionClass::Storm);
        assert_eq!(ConditionClass::classify(2.0, 35.0, 90.0), ConditionClass::LightRain);
        assert_eq!(ConditionClass::classify(0.0, 30.5, 90.0), ConditionClass::Hot);
        assert_eq!(ConditionClass::classify(0.0, 30.0, 81.0), ConditionClass::Overcast);
        assert_eq!(ConditionClass::classify(0.0, 25.0, 60.0), ConditionClass::Mild);
    }

    #[test]
    fn test_field_offset_shifts_hour_bucket() {
        // ---
        // 03:30 UTC is 14:30 at UTC+11, inside the afternoon bucket
        let eastern = SyntheticWeather::new(FixedOffset::east_opt(11 * 3600).unwrap());
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let s = eastern.generate(at_hour(3), &mut rng);
            assert!(s.ambient_temperature >= 26.0);
        }
    }
}
