//! Random ids, dates and picks used when seeding

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{DataError, DataResult};
use crate::model::DATE_FORMAT;

/// Length of every generated id.
pub const ID_LENGTH: usize = 9;

/// Draws before `random_id` gives up.
pub const MAX_ID_ATTEMPTS: usize = 64;

/// Window, in days, that seeded invoice dates fall into.
pub const DATE_WINDOW_DAYS: i64 = 365;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Base-36 digits of the fractional part of `fraction`, most significant
/// first, stopping early when the expansion terminates.
fn base36_fraction(mut fraction: f64, max_digits: usize) -> String {
    let mut digits = String::with_capacity(max_digits);
    while fraction > 0.0 && digits.len() < max_digits {
        fraction *= 36.0;
        let digit = fraction.floor();
        fraction -= digit;
        digits.push(BASE36[digit as usize % 36] as char);
    }
    digits
}

/// A 9-character lowercase base-36 id.
///
/// Draws are discarded until one yields all nine digits; after
/// [`MAX_ID_ATTEMPTS`] short draws an error is returned.
pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> DataResult<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = base36_fraction(rng.gen::<f64>(), ID_LENGTH);
        if id.len() == ID_LENGTH {
            return Ok(id);
        }
    }
    Err(DataError::IdGeneration {
        width: ID_LENGTH,
        attempts: MAX_ID_ATTEMPTS,
    })
}

/// UTC calendar date of a uniformly random instant in the
/// [`DATE_WINDOW_DAYS`] days up to `now`, as `YYYY-MM-DD`.
pub fn random_date<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> String {
    let window_ms = DATE_WINDOW_DAYS * 24 * 60 * 60 * 1000;
    let offset = Duration::milliseconds(rng.gen_range(0..window_ms));
    (now - offset).format(DATE_FORMAT).to_string()
}

/// Uniform pick from `candidates`; `None` when empty.
pub fn random_element<'a, T, R: Rng + ?Sized>(rng: &mut R, candidates: &'a [T]) -> Option<&'a T> {
    candidates.choose(rng)
}

/// `C` followed by the 1-based ordinal, zero-padded to three digits.
pub fn customer_name(ordinal: usize) -> String {
    format!("C{:03}", ordinal)
}

/// `I` followed by the 1-based ordinal, zero-padded to five digits.
pub fn invoice_reference(ordinal: usize) -> String {
    format!("I{:05}", ordinal)
}

/// Supplies the random parts of seeded records.
pub trait RecordSource {
    /// Next record id.
    fn id(&mut self) -> DataResult<String>;

    /// Next invoice date.
    fn date(&mut self) -> String;

    /// Uniform pick from `candidates`.
    fn pick<'a, T>(&mut self, candidates: &'a [T]) -> Option<&'a T>;
}

/// [`RecordSource`] backed by an RNG, with dates relative to a fixed `now`.
#[derive(Debug, Clone)]
pub struct RandomSource<R = StdRng> {
    rng: R,
    now: DateTime<Utc>,
}

impl RandomSource<StdRng> {
    /// Entropy-seeded source; dates are relative to the current time.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic source.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for RandomSource<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> RandomSource<R> {
    pub fn from_rng(rng: R) -> Self {
        Self { rng, now: Utc::now() }
    }

    /// Fix the instant dates are drawn back from.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl<R: Rng> RecordSource for RandomSource<R> {
    fn id(&mut self) -> DataResult<String> {
        random_id(&mut self.rng)
    }

    fn date(&mut self) -> String {
        random_date(&mut self.rng, self.now)
    }

    fn pick<'a, T>(&mut self, candidates: &'a [T]) -> Option<&'a T> {
        random_element(&mut self.rng, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rand::rngs::mock::StepRng;
    use std::collections::HashSet;

    fn is_id(s: &str) -> bool {
        s.len() == ID_LENGTH && s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    }

    #[test]
    fn test_base36_fraction() {
        assert_eq!(base36_fraction(0.5, 9), "i");
        assert_eq!(base36_fraction(0.0, 9), "");
        assert_eq!(base36_fraction(0.25, 9), "9");
        assert_eq!(base36_fraction(0.123_456_789, 9).len(), 9);
    }

    #[test]
    fn test_random_id_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let ids: HashSet<String> = (0..10_000).map(|_| random_id(&mut rng).unwrap()).collect();

        assert!(ids.iter().all(|id| is_id(id)));
        // Collisions are possible but vanishingly rare at this volume
        assert!(ids.len() > 9_990);
    }

    #[test]
    fn test_random_id_gives_up() {
        // Always draws 0.0, which has no fractional digits
        let mut rng = StepRng::new(0, 0);
        assert!(matches!(
            random_id(&mut rng),
            Err(DataError::IdGeneration {
                width: ID_LENGTH,
                attempts: MAX_ID_ATTEMPTS
            })
        ));
    }

    #[test]
    fn test_random_date_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let today = now.date_naive();
        let earliest = today - Duration::days(DATE_WINDOW_DAYS);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..1_000 {
            let date = random_date(&mut rng, now);
            let parsed = NaiveDate::parse_from_str(&date, DATE_FORMAT).unwrap();
            assert_eq!(date.len(), 10);
            assert!(parsed <= today && parsed >= earliest, "{} out of range", date);
        }
    }

    #[test]
    fn test_random_element() {
        let mut rng = StdRng::seed_from_u64(3);
        let empty: [u8; 0] = [];
        assert!(random_element(&mut rng, &empty).is_none());

        let items = ["a", "b", "c"];
        let seen: HashSet<&str> = (0..200)
            .filter_map(|_| random_element(&mut rng, &items).copied())
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_names_and_references() {
        assert_eq!(customer_name(1), "C001");
        assert_eq!(customer_name(100), "C100");
        assert_eq!(invoice_reference(1), "I00001");
        assert_eq!(invoice_reference(10_000), "I10000");
    }

    #[test]
    fn test_seeded_source_is_deterministic() {
        let now = Utc::now();
        let mut a = RandomSource::seeded(42).with_now(now);
        let mut b = RandomSource::seeded(42).with_now(now);

        assert_eq!(a.id().unwrap(), b.id().unwrap());
        assert_eq!(a.date(), b.date());
        assert_eq!(a.pick(&[1, 2, 3]), b.pick(&[1, 2, 3]));
    }
}
