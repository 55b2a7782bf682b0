//! Expiry records and next-delay computation.
//!
//! Temporary moderation states (temp ranks, timed mutes, timed freezes) are
//! stored as text lines:
//!
//! ```text
//! subject assigner assigned_unix expires_unix [extra...]
//! ```
//!
//! The watch task for a list fires when the earliest valid record expires.
//! Lines that cannot be parsed are never fired and never counted, so they stay
//! in the list until someone fixes them by hand.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RecordParseError;

/// Delay used when a list holds no valid pending records.
///
/// The watch task still fires on this cadence as a no-op; adding a record must
/// be followed by a recalculation so the stale sentinel is not waited out.
pub const NO_PENDING_EXPIRY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Delay used when the earliest record is already past its expiry.
///
/// This happens when the expiry callback for a record failed; the record is
/// retried on this cadence instead of spinning the tier.
pub const EXPIRY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One temporary moderation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryRecord {
    /// Player the state applies to.
    pub subject: String,
    /// Who applied it.
    pub assigner: String,
    /// When it was applied, if the field parsed.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When it stops applying.
    pub expires_at: DateTime<Utc>,
    /// Trailing fields owned by the list's domain (e.g. old and new rank).
    pub extra: Vec<String>,
}

impl ExpiryRecord {
    /// Build a record.
    pub fn new(
        subject: impl Into<String>,
        assigner: impl Into<String>,
        assigned_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            assigner: assigner.into(),
            assigned_at: Some(assigned_at),
            expires_at,
            extra: Vec::new(),
        }
    }

    /// Attach trailing domain fields.
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra = extra.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a list line.
    ///
    /// Only the expiry timestamp must be valid; an unparseable assignment time
    /// is kept as `None`.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(RecordParseError::MissingFields { found: fields.len() });
        }

        let expires_at = parse_unix(fields[3]).ok_or_else(|| RecordParseError::InvalidTimestamp {
            field: "expiry",
            value: fields[3].to_string(),
        })?;

        Ok(Self {
            subject: fields[0].to_string(),
            assigner: fields[1].to_string(),
            assigned_at: parse_unix(fields[2]),
            expires_at,
            extra: fields[4..].iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Serialize back to the list line format.
    pub fn to_line(&self) -> String {
        let assigned = self.assigned_at.map(|t| t.timestamp()).unwrap_or(0);
        let mut line = format!(
            "{} {} {} {}",
            self.subject,
            self.assigner,
            assigned,
            self.expires_at.timestamp()
        );
        for field in &self.extra {
            line.push(' ');
            line.push_str(field);
        }
        line
    }

    /// Check if the record has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

fn parse_unix(field: &str) -> Option<DateTime<Utc>> {
    field
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Earliest remaining time over the valid records in `lines`.
///
/// Malformed lines are ignored. Returns `None` when no valid record exists.
/// The result is negative when the earliest record is already expired.
pub fn min_remaining<'a>(
    lines: impl IntoIterator<Item = &'a String>,
    now: DateTime<Utc>,
) -> Option<chrono::Duration> {
    lines
        .into_iter()
        .filter_map(|line| ExpiryRecord::parse(line).ok())
        .map(|record| record.expires_at - now)
        .min()
}

/// Delay until the watch task for `lines` should next fire.
pub fn next_delay<'a>(lines: impl IntoIterator<Item = &'a String>, now: DateTime<Utc>) -> Duration {
    match min_remaining(lines, now) {
        None => NO_PENDING_EXPIRY,
        Some(remaining) => match remaining.to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => EXPIRY_RETRY_DELAY,
        },
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
