//! Per-user activity histograms, bucketed by local hour of day.
//!
//! Reading activity feeds a 24-bucket histogram under `uAct:<user_id>`; the
//! mode hour picks a personalized briefing generation time.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use redis::aio::ConnectionManager;

/// Users without enough history get their briefing before a 7 AM read.
pub const DEFAULT_READING_HOUR: u32 = 7;
/// An hour must be seen this many times before it counts as typical.
const MIN_ACTIVITY_COUNT: u64 = 5;
/// Briefings generate this far ahead of the typical reading hour.
const GENERATION_LEAD_MINUTES: i64 = 30;

fn parse_tz(tz_name: &str) -> Tz {
    tz_name.parse().unwrap_or(chrono_tz::UTC)
}

/// Count one user action against their current local hour.
pub async fn record_activity(
    redis: &mut ConnectionManager,
    user_id: i32,
    tz_name: &str,
) -> eyre::Result<()> {
    let tz = parse_tz(tz_name);
    let local_hour = Utc::now().with_timezone(&tz).hour();
    redis::cmd("HINCRBY")
        .arg(format!("uAct:{user_id}"))
        .arg(format!("hour_{local_hour}"))
        .arg(1)
        .query_async::<()>(redis)
        .await?;
    Ok(())
}

pub async fn get_activity_histogram(
    redis: &mut ConnectionManager,
    user_id: i32,
) -> eyre::Result<HashMap<u32, u64>> {
    let fields: HashMap<String, u64> = redis::cmd("HGETALL")
        .arg(format!("uAct:{user_id}"))
        .query_async(redis)
        .await?;

    Ok(fields
        .into_iter()
        .filter_map(|(field, count)| {
            field
                .strip_prefix("hour_")
                .and_then(|h| h.parse::<u32>().ok())
                .filter(|h| *h < 24)
                .map(|h| (h, count))
        })
        .collect())
}

/// The mode hour, if its count clears the activity floor. Ties break toward
/// the earlier hour so the result is stable.
pub fn typical_hour_from_histogram(histogram: &HashMap<u32, u64>) -> Option<u32> {
    histogram
        .iter()
        .filter(|(_, count)| **count >= MIN_ACTIVITY_COUNT)
        .max_by_key(|(hour, count)| (**count, std::cmp::Reverse(**hour)))
        .map(|(hour, _)| *hour)
}

pub async fn get_typical_reading_hour(
    redis: &mut ConnectionManager,
    user_id: i32,
) -> eyre::Result<Option<u32>> {
    let histogram = get_activity_histogram(redis, user_id).await?;
    Ok(typical_hour_from_histogram(&histogram))
}

/// The next generation time: 30 minutes before the user's typical (or
/// default) reading hour today in their timezone, as a naive UTC datetime.
/// Two users with the same local hour in different zones land on different
/// UTC instants.
pub fn generation_time_for_hour(typical_hour: Option<u32>, tz: Tz) -> NaiveDateTime {
    let hour = typical_hour.unwrap_or(DEFAULT_READING_HOUR);
    let local_today = Utc::now().with_timezone(&tz).date_naive();
    let local_reading = local_today
        .and_hms_opt(hour, 0, 0)
        .expect("histogram hours are 0-23");

    // DST gaps make some local times unrepresentable; shift those an hour
    // forward, with a last-resort UTC interpretation.
    let localized = match tz.from_local_datetime(&local_reading) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => tz
            .from_local_datetime(&(local_reading + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&local_reading)),
    };

    (localized - Duration::minutes(GENERATION_LEAD_MINUTES))
        .with_timezone(&Utc)
        .naive_utc()
}

pub async fn get_briefing_generation_time(
    redis: &mut ConnectionManager,
    user_id: i32,
    tz_name: &str,
) -> eyre::Result<NaiveDateTime> {
    let typical = get_typical_reading_hour(redis, user_id).await?;
    Ok(generation_time_for_hour(typical, parse_tz(tz_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_hour_is_the_peak() {
        let histogram = HashMap::from([(8, 5), (9, 20), (10, 3)]);
        assert_eq!(typical_hour_from_histogram(&histogram), Some(9));
    }

    #[test]
    fn typical_hour_needs_enough_data() {
        let histogram = HashMap::from([(9, 3)]);
        assert_eq!(typical_hour_from_histogram(&histogram), None);
        assert_eq!(typical_hour_from_histogram(&HashMap::new()), None);
    }

    #[test]
    fn typical_hour_tie_breaks_to_earlier() {
        let histogram = HashMap::from([(9, 10), (21, 10)]);
        assert_eq!(typical_hour_from_histogram(&histogram), Some(9));
    }

    #[test]
    fn generation_time_is_before_reading_hour() {
        let time = generation_time_for_hour(Some(9), chrono_tz::UTC);
        assert_eq!(time.hour(), 8);
        assert_eq!(time.minute(), 30);
    }

    #[test]
    fn generation_time_defaults_to_seven_local() {
        let time = generation_time_for_hour(None, chrono_tz::UTC);
        assert_eq!(time.hour(), 6);
        assert_eq!(time.minute(), 30);
    }

    #[test]
    fn same_local_hour_differs_across_timezones() {
        let new_york = generation_time_for_hour(Some(9), chrono_tz::America::New_York);
        let tokyo = generation_time_for_hour(Some(9), chrono_tz::Asia::Tokyo);
        assert_ne!(new_york, tokyo);
    }
}
