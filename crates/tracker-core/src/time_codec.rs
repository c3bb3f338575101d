//! Conversion between the stored `YYYY-MM-DD HH:MM:SS` text form and
//! [`OffsetDateTime`]. Stored values carry no offset and are always UTC.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::CoreError;

const DB_TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Returned by [`parse_time`] for text that is not in the stored format.
pub const SENTINEL_TIME: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

/// Parse a stored timestamp as UTC.
///
/// Malformed input yields [`SENTINEL_TIME`] instead of an error; callers that
/// care must check with [`is_sentinel`].
#[must_use]
pub fn parse_time(text: &str) -> OffsetDateTime {
    PrimitiveDateTime::parse(text.trim(), DB_TIME_FORMAT)
        .map_or(SENTINEL_TIME, PrimitiveDateTime::assume_utc)
}

/// Render a timestamp in UTC using the stored format. Sub-second precision is dropped.
///
/// # Errors
/// Returns [`CoreError::TimeFormat`] when the value cannot be represented.
pub fn format_time(value: OffsetDateTime) -> Result<String, CoreError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(DB_TIME_FORMAT)
        .map_err(|err| CoreError::TimeFormat(err.to_string()))
}

#[must_use]
pub fn is_sentinel(value: OffsetDateTime) -> bool {
    value == SENTINEL_TIME
}

/// Current time as whole seconds since the Unix epoch.
#[must_use]
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
