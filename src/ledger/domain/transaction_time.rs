use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of distinct transactions a single user may record within one second.
pub const SEQUENCE_SLOTS: i64 = 1000;

/// A transaction's position on a user's timeline.
///
/// The value packs the unix timestamp of the transaction with a sequence
/// number in its low-order digits (`unix * 1000 + sequence`), which keeps the
/// value unique per user and ordered by time even when several transactions
/// share the same second.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct TransactionTime(i64);

impl TransactionTime {
    /// Wrap an already packed value, e.g. one read from storage or received
    /// as a pagination cursor.
    pub fn from_packed(value: i64) -> Self {
        Self(value)
    }

    /// The smallest packed value belonging to the given second.
    pub fn min_for_unix_time(unix_time: i64) -> Self {
        Self(unix_time * SEQUENCE_SLOTS)
    }

    /// The largest packed value belonging to the given second.
    pub fn max_for_unix_time(unix_time: i64) -> Self {
        Self(unix_time * SEQUENCE_SLOTS + SEQUENCE_SLOTS - 1)
    }

    pub fn packed(self) -> i64 {
        self.0
    }

    pub fn unix_time(self) -> i64 {
        self.0.div_euclid(SEQUENCE_SLOTS)
    }

    pub fn sequence(self) -> i64 {
        self.0.rem_euclid(SEQUENCE_SLOTS)
    }

    /// The value directly after this one, if it is still within the same
    /// second.
    pub fn next(self) -> Option<Self> {
        if self.sequence() < SEQUENCE_SLOTS - 1 {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }

    /// The value directly before this one, if it is still within the same
    /// second.
    pub fn previous(self) -> Option<Self> {
        if self.sequence() > 0 {
            Some(Self(self.0 - 1))
        } else {
            None
        }
    }

    /// Pick the packed time for a new row in `unix_time`'s second.
    ///
    /// # Arguments
    ///
    /// * `unix_time` - The second the row belongs to.
    /// * `latest_taken` - The largest packed value the user already holds in
    ///   that second, if any.
    /// * `slots_needed` - How many consecutive values the caller will use.
    ///   Transfers need two, one for each row of the pair.
    ///
    /// # Returns
    ///
    /// The first value of the reserved run, or [`None`] if the second is full.
    pub fn allocate(unix_time: i64, latest_taken: Option<Self>, slots_needed: i64) -> Option<Self> {
        let first = match latest_taken {
            Some(latest) if latest.unix_time() == unix_time => Self(latest.0 + 1),
            _ => Self::min_for_unix_time(unix_time),
        };

        let last = first.0 + slots_needed.max(1) - 1;
        if last <= Self::max_for_unix_time(unix_time).0 {
            Some(first)
        } else {
            None
        }
    }
}

impl fmt::Display for TransactionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unix_time_is_extracted_from_packed_value() {
        let time = TransactionTime::from_packed(1_650_000_000_042);

        assert_eq!(1_650_000_000, time.unix_time());
        assert_eq!(42, time.sequence());
    }

    #[test]
    fn min_and_max_bound_the_second() {
        let min = TransactionTime::min_for_unix_time(1_650_000_000);
        let max = TransactionTime::max_for_unix_time(1_650_000_000);

        assert_eq!(1_650_000_000_000, min.packed());
        assert_eq!(1_650_000_000_999, max.packed());
        assert_eq!(min.unix_time(), max.unix_time());
    }

    #[test]
    fn allocate_in_empty_second_starts_at_zero() {
        let got = TransactionTime::allocate(100, None, 1).expect("second is empty");

        assert_eq!(TransactionTime::min_for_unix_time(100), got);
    }

    #[test]
    fn allocate_ignores_rows_from_other_seconds() {
        let latest = TransactionTime::from_packed(99_500);
        let got = TransactionTime::allocate(100, Some(latest), 1).expect("second is empty");

        assert_eq!(100_000, got.packed());
    }

    #[test]
    fn allocate_follows_latest_in_same_second() {
        let latest = TransactionTime::from_packed(100_004);
        let got = TransactionTime::allocate(100, Some(latest), 2).expect("room for a pair");

        assert_eq!(100_005, got.packed());
    }

    #[test]
    fn allocate_fails_when_second_is_full() {
        let latest = TransactionTime::max_for_unix_time(100);

        assert_eq!(None, TransactionTime::allocate(100, Some(latest), 1));
    }

    #[test]
    fn allocate_pair_needs_two_slots() {
        let latest = TransactionTime::from_packed(100_997);

        assert_eq!(
            Some(TransactionTime::from_packed(100_998)),
            TransactionTime::allocate(100, Some(latest), 2)
        );

        let latest = TransactionTime::from_packed(100_998);
        assert_eq!(None, TransactionTime::allocate(100, Some(latest), 2));
    }

    #[test]
    fn next_and_previous_stay_within_second() {
        assert_eq!(None, TransactionTime::max_for_unix_time(5).next());
        assert_eq!(None, TransactionTime::min_for_unix_time(5).previous());
        assert_eq!(
            Some(TransactionTime::from_packed(5_001)),
            TransactionTime::min_for_unix_time(5).next()
        );
    }
}
