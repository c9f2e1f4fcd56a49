//! The authentication token and its expiry handling.
//!
//! The ticketing API reports expiry as an ISO-8601 string whose shape varies
//! between deployments: with or without a zone marker, and with up to seven
//! fractional-second digits. All of that is absorbed by [`parse_expiry`]; any
//! string it cannot read makes the token stale.

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

/// Buffer before expiry inside which a token is already considered stale (5 minutes).
pub const DEFAULT_EXPIRY_BUFFER: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Fractional-second digits kept when normalizing an expiry string.
const MAX_FRACTION_DIGITS: usize = 6;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Credential issued by the ticketing API.
///
/// Both fields are always replaced together.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Token {
    pub credential: String,
    /// Expiry exactly as reported by the remote system
    pub expires_at: String,
}

impl Token {
    pub fn new(credential: impl Into<String>, expires_at: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            expires_at: expires_at.into(),
        }
    }

    /// Parsed expiry, `None` if missing or malformed
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        parse_expiry(&self.expires_at)
    }

    /// Whether the token must not be used at `now`.
    ///
    /// A token is stale when it has no credential, when its expiry cannot be
    /// read, or when it expires within `buffer` of `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        if self.credential.is_empty() {
            return true;
        }
        match self.expiry() {
            Some(expiry) => expiry <= now + buffer,
            None => true,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("credential", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read-only snapshot of the token state for diagnostics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub has_token: bool,
    pub expires_at: Option<String>,
    pub is_expired: bool,
    /// Account the bridge authenticates as
    pub identity: String,
}

/// Parse a token expiry string into UTC.
///
/// Accepts RFC 3339 directly. Otherwise a trailing `Z` or `UTC` marks UTC, a
/// numeric offset (`+HH:MM`, `+HHMM`, `+HH`) is applied, and a bare local
/// time is read as UTC. The fraction is truncated to six digits first.
/// Returns `None` for anything else.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let (local, offset) = split_zone(raw)?;
    let normalized = truncate_fraction(local.trim_end(), MAX_FRACTION_DIGITS);

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Split a timestamp into its local part and zone offset (UTC when absent)
fn split_zone(s: &str) -> Option<(&str, FixedOffset)> {
    let utc = FixedOffset::east_opt(0)?;

    if let Some(stripped) = s.strip_suffix("UTC") {
        return Some((stripped, utc));
    }
    if let Some(stripped) = s.strip_suffix(|c: char| c == 'Z' || c == 'z') {
        return Some((stripped, utc));
    }

    // A sign after the date/time separator starts a numeric offset
    let Some(time_start) = s.find(|c: char| c == 'T' || c == ' ') else {
        return Some((s, utc));
    };
    match s[time_start..].rfind(|c: char| c == '+' || c == '-') {
        Some(sign) => {
            let at = time_start + sign;
            Some((&s[..at], parse_offset(&s[at..])?))
        }
        None => Some((s, utc)),
    }
}

/// `+HH:MM`, `+HHMM` or `+HH` (and `-` variants)
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn truncate_fraction(s: &str, max_digits: usize) -> String {
    let Some(dot) = s.rfind('.') else {
        return s.to_string();
    };
    let digits = s[dot + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits <= max_digits {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..dot + 1 + max_digits]);
    out.push_str(&s[dot + 1 + digits..]);
    out
}
