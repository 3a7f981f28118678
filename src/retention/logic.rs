// backuptool/src/retention/logic.rs
//! Tiered retention: which artifacts survive a cleanup.
//!
//! Each active tier walks `count` fixed-size windows back from `now` and
//! reserves one artifact per window. Everything no tier reserved is removed.
//! Windows are `(start, end]`: an artifact stamped exactly at `start` belongs
//! to the next older window.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use std::collections::HashSet;

use super::policy::{Tier, TieredPolicy};
use crate::utils::naming::extract_timestamp;

/// Most recent window of a tier and the stride between windows.
///
/// Monthly windows use a fixed 30-day stride, not calendar months.
fn first_window(tier: Tier, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime, Duration) {
    let today = now.date().and_time(NaiveTime::MIN);
    let (end, delta) = match tier {
        Tier::Monthly => (today - Duration::days(i64::from(now.day0())), Duration::days(30)),
        Tier::Weekly => (
            today - Duration::days(i64::from(now.weekday().num_days_from_monday())),
            Duration::days(7),
        ),
        Tier::Daily => (today + Duration::days(1), Duration::days(1)),
        Tier::Hourly => (
            today + Duration::hours(i64::from(now.hour()) + 1),
            Duration::minutes(60),
        ),
    };
    (end - delta, end, delta)
}

fn between_interval(name: &str, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    match extract_timestamp(name) {
        Ok(d) => start < d && d <= end,
        Err(_) => false,
    }
}

/// Reserves at most one artifact per window for `count` windows of `tier`.
///
/// Artifacts are scanned in the order given and the first one inside a window
/// wins; callers wanting "oldest in window wins" pass them sorted ascending.
/// Names without a timestamp never match a window.
pub fn reserve_interval(
    artifacts: &[String],
    tier: Tier,
    count: u32,
    now: NaiveDateTime,
) -> Vec<String> {
    let (mut start, mut end, delta) = first_window(tier, now);
    let mut reserved = Vec::new();

    for _ in 0..count {
        if let Some(found) = artifacts
            .iter()
            .find(|name| between_interval(name, start, end))
        {
            reserved.push(found.clone());
        }
        end -= delta;
        start -= delta;
    }
    reserved
}

/// Returns the artifacts to delete under `policy`, oldest first.
///
/// The input is sorted ascending by embedded timestamp (name breaks ties)
/// before any tier is evaluated, so the oldest artifact of each window is the
/// one kept regardless of the caller's ordering. Names without a timestamp
/// are neither kept nor removed.
pub fn decide_remove(artifacts: &[String], policy: &TieredPolicy, now: NaiveDateTime) -> Vec<String> {
    let mut dated: Vec<(NaiveDateTime, &String)> = artifacts
        .iter()
        .filter_map(|name| extract_timestamp(name).ok().map(|ts| (ts, name)))
        .collect();
    dated.sort();
    let ordered: Vec<String> = dated.into_iter().map(|(_, name)| name.clone()).collect();

    let mut keep: HashSet<String> = HashSet::new();
    for (tier, count) in policy.active_tiers() {
        keep.extend(reserve_interval(&ordered, tier, count, now));
    }

    ordered.into_iter().filter(|name| !keep.contains(name)).collect()
}
