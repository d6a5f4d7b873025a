//! Ingestion fast path.

mod parse;
mod writer;

pub use parse::{
    parse_device_timestamp, parse_flag, RawReadingPayload, DEVICE_TIMESTAMP_FORMAT, TRUTHY_TOKENS,
};
pub use writer::{FastPathWriter, IngestReceipt};
