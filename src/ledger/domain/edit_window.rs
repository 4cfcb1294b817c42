use std::convert::TryFrom;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};

use super::transaction_time::TransactionTime;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// How far back a user allows transactions to be created, changed or removed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransactionEditScope {
    None,
    All,
    TodayOrLater,
    Last24HourOrLater,
    ThisWeekOrLater,
    ThisMonthOrLater,
    ThisYearOrLater,
}

impl TransactionEditScope {
    pub fn code(self) -> i16 {
        match self {
            Self::None => 0,
            Self::All => 1,
            Self::TodayOrLater => 2,
            Self::Last24HourOrLater => 3,
            Self::ThisWeekOrLater => 4,
            Self::ThisMonthOrLater => 5,
            Self::ThisYearOrLater => 6,
        }
    }
}

impl Default for TransactionEditScope {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownEditScope(pub i16);

impl TryFrom<i16> for TransactionEditScope {
    type Error = UnknownEditScope;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::All),
            2 => Ok(Self::TodayOrLater),
            3 => Ok(Self::Last24HourOrLater),
            4 => Ok(Self::ThisWeekOrLater),
            5 => Ok(Self::ThisMonthOrLater),
            6 => Ok(Self::ThisYearOrLater),
            other => Err(UnknownEditScope(other)),
        }
    }
}

/// The part of a user's preferences that decides which transactions they may
/// still touch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EditPolicy {
    pub scope: TransactionEditScope,
    pub first_day_of_week: Weekday,
}

impl EditPolicy {
    pub fn allows(
        &self,
        transaction_time: TransactionTime,
        now: DateTime<FixedOffset>,
        client_utc_offset: i16,
    ) -> bool {
        can_edit(
            self.scope,
            transaction_time,
            now,
            client_utc_offset,
            self.first_day_of_week,
        )
    }
}

/// Decide whether a transaction at `transaction_time` falls inside the window
/// described by `scope`.
///
/// "Today" starts at midnight in the client's timezone. The week, month and
/// year anchors count whole days back from that midnight using the weekday,
/// day of month and day of year of `now` as seen by the server, so `now` must
/// carry the server's local offset.
///
/// # Arguments
///
/// * `scope` - The user's edit scope.
/// * `transaction_time` - The packed time of the transaction.
/// * `now` - The current time in the server's local offset.
/// * `client_utc_offset` - The client's UTC offset in minutes.
/// * `first_day_of_week` - The day the user's weeks start on.
pub fn can_edit(
    scope: TransactionEditScope,
    transaction_time: TransactionTime,
    now: DateTime<FixedOffset>,
    client_utc_offset: i16,
    first_day_of_week: Weekday,
) -> bool {
    let transaction_unix_time = transaction_time.unix_time();

    let today_start = || client_today_start(now, client_utc_offset);

    let window_start = match scope {
        TransactionEditScope::None => return false,
        TransactionEditScope::All => return true,
        TransactionEditScope::Last24HourOrLater => Some(now.timestamp() - SECONDS_PER_DAY),
        TransactionEditScope::TodayOrLater => today_start(),
        TransactionEditScope::ThisWeekOrLater => {
            let mut days_since_week_start = i64::from(now.weekday().num_days_from_sunday())
                - i64::from(first_day_of_week.num_days_from_sunday());

            if days_since_week_start < 0 {
                days_since_week_start += 7;
            }

            today_start().map(|start| start - days_since_week_start * SECONDS_PER_DAY)
        }
        TransactionEditScope::ThisMonthOrLater => {
            today_start().map(|start| start - (i64::from(now.day()) - 1) * SECONDS_PER_DAY)
        }
        TransactionEditScope::ThisYearOrLater => {
            today_start().map(|start| start - (i64::from(now.ordinal()) - 1) * SECONDS_PER_DAY)
        }
    };

    match window_start {
        Some(start) => transaction_unix_time >= start,
        None => false,
    }
}

fn client_today_start(now: DateTime<FixedOffset>, client_utc_offset: i16) -> Option<i64> {
    let client_zone = FixedOffset::east_opt(i32::from(client_utc_offset) * 60)?;
    let client_now = now.with_timezone(&client_zone);

    Some(client_now.timestamp() - i64::from(client_now.num_seconds_from_midnight()))
}

#[cfg(test)]
mod test {
    use chrono::{NaiveDate, TimeZone};

    use super::*;

    fn at(offset_hours: i32, date: (i32, u32, u32), time: (u32, u32, u32)) -> DateTime<FixedOffset> {
        let zone = FixedOffset::east_opt(offset_hours * 3600).expect("valid offset");
        let naive = NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .and_then(|d| d.and_hms_opt(time.0, time.1, time.2))
            .expect("valid date");

        zone.from_local_datetime(&naive)
            .single()
            .expect("fixed offsets are unambiguous")
    }

    fn time_of(instant: DateTime<FixedOffset>) -> TransactionTime {
        TransactionTime::min_for_unix_time(instant.timestamp())
    }

    fn check(scope: TransactionEditScope, instant: DateTime<FixedOffset>, now: DateTime<FixedOffset>, offset: i16) -> bool {
        can_edit(scope, time_of(instant), now, offset, Weekday::Sun)
    }

    // Wednesday.
    fn now() -> DateTime<FixedOffset> {
        at(0, (2023, 3, 15), (10, 0, 0))
    }

    #[test]
    fn all_allows_any_time() {
        assert!(can_edit(TransactionEditScope::All, TransactionTime::from_packed(0), now(), 0, Weekday::Sun));
        assert!(check(TransactionEditScope::All, at(0, (2999, 1, 1), (0, 0, 0)), now(), 0));
        assert!(check(TransactionEditScope::All, at(0, (1971, 1, 1), (0, 0, 0)), now(), 0));
    }

    #[test]
    fn none_allows_nothing() {
        assert!(!check(TransactionEditScope::None, now(), now(), 0));
        assert!(!check(TransactionEditScope::None, at(0, (2999, 1, 1), (0, 0, 0)), now(), 0));
    }

    #[test]
    fn last_24_hours_boundary() {
        let now = now();
        let within = TransactionTime::min_for_unix_time(now.timestamp() - 86_399);
        let exact = TransactionTime::min_for_unix_time(now.timestamp() - 86_400);
        let outside = TransactionTime::min_for_unix_time(now.timestamp() - 86_401);

        assert!(can_edit(TransactionEditScope::Last24HourOrLater, within, now, 0, Weekday::Sun));
        assert!(can_edit(TransactionEditScope::Last24HourOrLater, exact, now, 0, Weekday::Sun));
        assert!(!can_edit(TransactionEditScope::Last24HourOrLater, outside, now, 0, Weekday::Sun));
    }

    #[test]
    fn last_24_hours_ignores_client_offset() {
        let now = now();
        let outside = TransactionTime::min_for_unix_time(now.timestamp() - 86_401);

        assert!(!can_edit(TransactionEditScope::Last24HourOrLater, outside, now, 840, Weekday::Sun));
        assert!(!can_edit(TransactionEditScope::Last24HourOrLater, outside, now, -720, Weekday::Sun));
    }

    #[test]
    fn today_starts_at_client_midnight() {
        let scope = TransactionEditScope::TodayOrLater;

        assert!(check(scope, at(0, (2023, 3, 15), (0, 0, 0)), now(), 0));
        assert!(!check(scope, at(0, (2023, 3, 14), (23, 59, 59)), now(), 0));

        // 20:00 on the 15th for a client ten hours ahead.
        assert!(check(scope, at(10, (2023, 3, 15), (0, 0, 0)), now(), 600));
        assert!(!check(scope, at(10, (2023, 3, 14), (23, 59, 59)), now(), 600));

        // 01:00 on the 15th for a client nine hours behind.
        assert!(check(scope, at(-9, (2023, 3, 15), (0, 0, 0)), now(), -540));
        assert!(!check(scope, at(-9, (2023, 3, 14), (23, 59, 59)), now(), -540));
    }

    #[test]
    fn week_respects_first_day_of_week() {
        let scope = TransactionEditScope::ThisWeekOrLater;
        let sunday_start = at(0, (2023, 3, 12), (0, 0, 0));
        let monday_start = at(0, (2023, 3, 13), (0, 0, 0));
        let thursday_start = at(0, (2023, 3, 9), (0, 0, 0));

        assert!(can_edit(scope, time_of(sunday_start), now(), 0, Weekday::Sun));
        assert!(!can_edit(scope, TransactionTime::min_for_unix_time(sunday_start.timestamp() - 1), now(), 0, Weekday::Sun));

        assert!(can_edit(scope, time_of(monday_start), now(), 0, Weekday::Mon));
        assert!(!can_edit(scope, time_of(sunday_start), now(), 0, Weekday::Mon));

        // The week started last Thursday when it begins on a later weekday.
        assert!(can_edit(scope, time_of(thursday_start), now(), 0, Weekday::Thu));
        assert!(!can_edit(scope, TransactionTime::min_for_unix_time(thursday_start.timestamp() - 1), now(), 0, Weekday::Thu));
    }

    #[test]
    fn month_and_year_anchor_to_first_day() {
        let month_start = at(0, (2023, 3, 1), (0, 0, 0));
        let year_start = at(0, (2023, 1, 1), (0, 0, 0));

        assert!(check(TransactionEditScope::ThisMonthOrLater, month_start, now(), 0));
        assert!(!check(TransactionEditScope::ThisMonthOrLater, at(0, (2023, 2, 28), (23, 59, 59)), now(), 0));

        assert!(check(TransactionEditScope::ThisYearOrLater, year_start, now(), 0));
        assert!(!check(TransactionEditScope::ThisYearOrLater, at(0, (2022, 12, 31), (23, 59, 59)), now(), 0));
    }

    #[test]
    fn month_counts_days_from_server_calendar() {
        // The server is still on the 31st of March while the client is
        // already on the 1st of April.
        let now = at(0, (2023, 3, 31), (23, 30, 0));
        let scope = TransactionEditScope::ThisMonthOrLater;

        // Client midnight is 22:00 UTC on the 31st, minus 30 server days.
        assert!(check(scope, at(0, (2023, 3, 1), (22, 0, 0)), now, 120));
        assert!(!check(scope, at(0, (2023, 3, 1), (21, 59, 59)), now, 120));
    }

    #[test]
    fn scope_codes_round_trip() {
        for code in 0..=6 {
            let scope = TransactionEditScope::try_from(code).expect("known scope");
            assert_eq!(code, scope.code());
        }

        assert_eq!(Err(UnknownEditScope(7)), TransactionEditScope::try_from(7));
    }
}
