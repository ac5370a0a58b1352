//! Reference number generation.

use rand::Rng;
use remit_common::{ReferenceNumber, Timestamp};

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Number of random base-36 characters appended to each reference.
pub const RANDOM_SUFFIX_LEN: usize = 4;

/// Produces candidate reference numbers.
///
/// Candidates are not guaranteed unique; the store rejects duplicates and
/// the ledger asks for another.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self, now: Timestamp) -> ReferenceNumber;
}

/// `prefix + base36(unix millis) + 4 random base36 chars`, upper case.
#[derive(Debug, Clone)]
pub struct TimestampReferenceGenerator {
    prefix: String,
}

impl TimestampReferenceGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_uppercase(),
        }
    }
}

impl Default for TimestampReferenceGenerator {
    fn default() -> Self {
        Self::new("RF")
    }
}

impl ReferenceGenerator for TimestampReferenceGenerator {
    fn generate(&self, now: Timestamp) -> ReferenceNumber {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let mut rng = rand::thread_rng();
        let suffix: String = (0..RANDOM_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();

        ReferenceNumber::new(format!("{}{}{}", self.prefix, to_base36(millis), suffix))
    }
}

/// Encode `value` in upper-case base 36.
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    String::from_utf8_lossy(&digits).into_owned()
}

/// Replays a fixed list of references, then repeats the last one.
#[cfg(any(test, feature = "test-utils"))]
pub struct SequenceReferenceGenerator {
    references: parking_lot::Mutex<std::collections::VecDeque<String>>,
    last: parking_lot::Mutex<String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl SequenceReferenceGenerator {
    pub fn new<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            references: parking_lot::Mutex::new(references.into_iter().map(Into::into).collect()),
            last: parking_lot::Mutex::new("RF0000".to_string()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl ReferenceGenerator for SequenceReferenceGenerator {
    fn generate(&self, _now: Timestamp) -> ReferenceNumber {
        let mut last = self.last.lock();
        if let Some(next) = self.references.lock().pop_front() {
            *last = next;
        }
        ReferenceNumber::new(last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "LOYW3V28");
    }

    #[test]
    fn test_reference_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let reference = TimestampReferenceGenerator::new("rf").generate(now);
        let value = reference.as_str();

        assert!(value.starts_with("RFLOYW3V28"));
        assert_eq!(value.len(), 2 + 8 + RANDOM_SUFFIX_LEN);
        assert!(value
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sequence_generator_repeats_last() {
        let generator = SequenceReferenceGenerator::new(["RFAAA", "RFBBB"]);
        let now = Utc::now();

        assert_eq!(generator.generate(now).as_str(), "RFAAA");
        assert_eq!(generator.generate(now).as_str(), "RFBBB");
        assert_eq!(generator.generate(now).as_str(), "RFBBB");
    }
}
