use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::state::room::Timestamp;

pub mod caller;
pub mod health;
pub mod room;
pub mod sse;
pub mod validation;

fn format_timestamp(timestamp: Timestamp) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp.as_millis()) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
