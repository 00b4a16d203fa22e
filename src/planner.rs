//! Per-(mint, month) window planning over the checkpoint map.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};

use crate::checkpoint::CheckpointMap;
use crate::period;
use crate::provider::FetchWindow;
use crate::registry::MintEntry;
use crate::store::{KvStore, StoreError};

pub const HOUR_SECS: i64 = 3_600;

/// Planner-side activity gate (`>= 200`); the registry pre-filters at
/// `> 200` and both must hold independently.
pub const MIN_SWAP_COUNT: u64 = 200;

/// Calendar-month boundaries in unix seconds; `end` is the start of the
/// next month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: i64,
    pub end: i64,
}

pub fn month_window(first_of_month: NaiveDate) -> MonthWindow {
    MonthWindow {
        start: month_start_ts(first_of_month),
        end: month_start_ts(next_month(first_of_month)),
    }
}

/// First-of-month dates from `start_date`'s month through the month
/// containing `now_ts`, in order.
pub fn months_between(start_date: NaiveDate, now_ts: i64) -> Vec<NaiveDate> {
    let mut month = NaiveDate::from_ymd_opt(start_date.year(), start_date.month(), 1)
        .expect("valid month start date expected");

    let mut out = Vec::new();
    while month_start_ts(month) <= now_ts {
        out.push(month);
        month = next_month(month);
    }
    out
}

pub fn next_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).expect("valid next month expected")
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
            .expect("valid next month expected")
    }
}

fn month_start_ts(date: NaiveDate) -> i64 {
    Utc.with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
        .single()
        .expect("valid UTC month boundary expected")
        .timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LowActivity,
    PredatesMint,
    AlreadyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlan {
    Fetch(FetchWindow),
    Skip(SkipReason),
}

/// Decides the next fetch window for `entry` within `month`, resuming
/// one hour past the checkpoint (or one hour into the month when no
/// checkpoint exists). A window whose start has already passed `end` is
/// still handed to the engine, which treats the empty fetch as no data.
pub async fn plan_window(
    entry: &MintEntry,
    month: MonthWindow,
    checkpoints: &CheckpointMap,
    store: &dyn KvStore,
) -> Result<WindowPlan, StoreError> {
    let window_start = checkpoints
        .last_ingested(&entry.mint)
        .unwrap_or(month.start)
        + HOUR_SECS;
    let window_end = month.end;

    if entry.swap_count < MIN_SWAP_COUNT {
        return Ok(WindowPlan::Skip(SkipReason::LowActivity));
    }

    if entry.earliest_transfer.timestamp() > window_end {
        return Ok(WindowPlan::Skip(SkipReason::PredatesMint));
    }

    if period::complete_exists(store, &entry.mint, window_start, window_end).await? {
        return Ok(WindowPlan::Skip(SkipReason::AlreadyComplete));
    }

    Ok(WindowPlan::Fetch(FetchWindow {
        start: window_start,
        end: window_end,
    }))
}
