use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Disable and pending-change event payloads.
pub mod events;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Current wall-clock time formatted as RFC 3339.
pub(crate) fn now_rfc3339() -> String {
    format_system_time(SystemTime::now())
}
