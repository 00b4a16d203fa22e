//! Fetch, classify, and reconcile hourly OHLCV windows per tracked mint.
//!
//! The loop is strictly sequential: one window's checkpoint and record
//! writes land before the next mint is considered, which keeps the
//! single-writer-per-checkpoint invariant explicit.

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::info;

use crate::checkpoint::CheckpointMap;
use crate::period::{self, PeriodRecord};
use crate::planner::{self, SkipReason, WindowPlan, HOUR_SECS};
use crate::provider::{FetchWindow, OhlcvPoint, OhlcvProvider, ProviderError};
use crate::registry::{self, MintEntry};
use crate::store::{KvStore, StoreError};
use crate::warehouse::{self, WarehouseError, WarehouseSink};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error("no tracked mints stored; run the registry poller first")]
    NoTrackedMints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// First month to consider; fetching never reaches before this.
    pub start_date: NaiveDate,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2023, 6, 1).expect("valid epoch start date"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub windows_planned: u64,
    pub windows_skipped: u64,
    pub empty_windows: u64,
    pub complete_periods: u64,
    pub incomplete_periods: u64,
    pub superseded_incomplete: u64,
    pub rows_published: u64,
}

/// Start of the most recent fully elapsed clock hour.
pub fn latest_elapsed_hour(now_ts: i64) -> i64 {
    now_ts - now_ts.rem_euclid(HOUR_SECS)
}

/// Drops the provider's speculative same-hour placeholders: points with
/// zero volume strictly beyond the latest elapsed hour. Genuine
/// zero-volume trading hours at or before it are retained.
pub fn retain_settled_points(points: Vec<OhlcvPoint>, latest_elapsed_hour: i64) -> Vec<OhlcvPoint> {
    points
        .into_iter()
        .filter(|point| !(point.v == 0.0 && point.unix_time > latest_elapsed_hour))
        .collect()
}

/// Complete iff the last retained point lands exactly on the window end.
pub fn classify(points: &[OhlcvPoint], window_end: i64) -> Classification {
    match points.last() {
        Some(last) if last.unix_time == window_end => Classification::Complete,
        _ => Classification::Incomplete,
    }
}

/// Runs the full fetch-and-reconcile pass using the current wall clock.
pub async fn run_sync(
    store: &dyn KvStore,
    provider: &dyn OhlcvProvider,
    sink: Option<&dyn WarehouseSink>,
    cfg: &SyncConfig,
) -> Result<SyncReport, SyncError> {
    run_sync_at(store, provider, sink, cfg, Utc::now().timestamp()).await
}

/// Same as [`run_sync`] with an explicit `now_ts`, which fixes both the
/// last month considered and the speculative-point cutoff.
pub async fn run_sync_at(
    store: &dyn KvStore,
    provider: &dyn OhlcvProvider,
    sink: Option<&dyn WarehouseSink>,
    cfg: &SyncConfig,
    now_ts: i64,
) -> Result<SyncReport, SyncError> {
    let mints = registry::load_tracked_mints(store)
        .await?
        .ok_or(SyncError::NoTrackedMints)?;
    let mut checkpoints = CheckpointMap::load(store).await?;
    let months = planner::months_between(cfg.start_date, now_ts);

    info!(
        component = "engine",
        event = "ohlcv.sync.start",
        mints = mints.len(),
        months = months.len(),
        publish = sink.is_some()
    );

    let mut report = SyncReport::default();

    for month_date in months {
        let month = planner::month_window(month_date);
        for entry in &mints {
            match planner::plan_window(entry, month, &checkpoints, store).await? {
                WindowPlan::Skip(reason) => {
                    report.windows_skipped += 1;
                    log_skip(entry, month.end, reason);
                }
                WindowPlan::Fetch(window) => {
                    report.windows_planned += 1;
                    ingest_window(
                        store,
                        provider,
                        sink,
                        &mut checkpoints,
                        entry,
                        window,
                        now_ts,
                        &mut report,
                    )
                    .await?;
                }
            }
        }
    }

    // end-of-run snapshot, mirroring the per-fetch persists
    checkpoints.persist(store).await?;

    info!(
        component = "engine",
        event = "ohlcv.sync.finish",
        windows_planned = report.windows_planned,
        windows_skipped = report.windows_skipped,
        empty_windows = report.empty_windows,
        complete_periods = report.complete_periods,
        incomplete_periods = report.incomplete_periods,
        superseded_incomplete = report.superseded_incomplete,
        rows_published = report.rows_published
    );

    Ok(report)
}

fn log_skip(entry: &MintEntry, window_end: i64, reason: SkipReason) {
    info!(
        component = "engine",
        event = "ohlcv.plan.skip",
        mint = %entry.mint,
        swap_count = entry.swap_count,
        window_end,
        reason = ?reason
    );
}

#[allow(clippy::too_many_arguments)]
async fn ingest_window(
    store: &dyn KvStore,
    provider: &dyn OhlcvProvider,
    sink: Option<&dyn WarehouseSink>,
    checkpoints: &mut CheckpointMap,
    entry: &MintEntry,
    window: FetchWindow,
    now_ts: i64,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    info!(
        component = "engine",
        event = "ohlcv.fetch.start",
        mint = %entry.mint,
        window_start = window.start,
        window_end = window.end
    );

    let raw = provider.fetch_hourly(&entry.mint, window).await?;
    if raw.is_empty() {
        info!(
            component = "engine",
            event = "ohlcv.fetch.no_data",
            mint = %entry.mint,
            window_start = window.start,
            window_end = window.end
        );
        report.empty_windows += 1;
        return Ok(());
    }

    let raw_count = raw.len();
    let points = retain_settled_points(raw, latest_elapsed_hour(now_ts));
    let Some(last) = points.last() else {
        info!(
            component = "engine",
            event = "ohlcv.fetch.no_data",
            mint = %entry.mint,
            window_start = window.start,
            window_end = window.end,
            placeholders_dropped = raw_count
        );
        report.empty_windows += 1;
        return Ok(());
    };

    // Progress is durable before any record write: a crash past this
    // point never refetches what was already ingested.
    checkpoints.advance(&entry.mint, last.unix_time);
    checkpoints.persist(store).await?;

    let classification = classify(&points, window.end);
    let record = PeriodRecord {
        mint: entry.mint.clone(),
        window_start: window.start,
        window_end: window.end,
        items: points,
    };

    match classification {
        Classification::Complete => {
            let superseded = period::delete_incomplete(store, &entry.mint, window.start).await?;
            if superseded {
                report.superseded_incomplete += 1;
            }
            record.save_complete(store).await?;
            info!(
                component = "engine",
                event = "ohlcv.period.complete",
                mint = %entry.mint,
                window_start = window.start,
                window_end = window.end,
                points = record.items.len(),
                superseded
            );

            if let Some(sink) = sink {
                let rows = warehouse::price_rows(&record.items);
                report.rows_published += sink.append_rows(&rows).await?;
            }
            report.complete_periods += 1;
        }
        Classification::Incomplete => {
            record.save_incomplete(store).await?;
            info!(
                component = "engine",
                event = "ohlcv.period.incomplete",
                mint = %entry.mint,
                window_start = window.start,
                window_end = window.end,
                points = record.items.len()
            );
            report.incomplete_periods += 1;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(unix_time: i64, v: f64) -> OhlcvPoint {
        OhlcvPoint {
            address: "mint-a".to_string(),
            unix_time,
            o: 1.0,
            h: 1.0,
            l: 1.0,
            c: 1.0,
            v,
        }
    }

    #[test]
    fn latest_elapsed_hour_floors_to_the_hour() {
        assert_eq!(latest_elapsed_hour(1_688_171_400), 1_688_169_600);
        assert_eq!(latest_elapsed_hour(1_688_169_600), 1_688_169_600);
        assert_eq!(latest_elapsed_hour(1_688_169_599), 1_688_166_000);
    }

    #[test]
    fn filter_drops_only_speculative_zero_volume_points() {
        let cutoff = 1_688_169_600;
        let points = vec![
            point(cutoff - HOUR_SECS, 0.0), // genuine quiet hour, kept
            point(cutoff, 0.0),             // at the cutoff, kept
            point(cutoff + HOUR_SECS, 0.0), // speculative placeholder, dropped
            point(cutoff + HOUR_SECS, 5.0), // traded volume past cutoff, kept
        ];

        let retained = retain_settled_points(points, cutoff);
        let times: Vec<(i64, f64)> = retained.iter().map(|p| (p.unix_time, p.v)).collect();
        assert_eq!(
            times,
            vec![
                (cutoff - HOUR_SECS, 0.0),
                (cutoff, 0.0),
                (cutoff + HOUR_SECS, 5.0),
            ]
        );
    }

    #[test]
    fn classification_requires_the_exact_window_end() {
        let window_end = 1_688_169_600;

        let full = vec![point(window_end - HOUR_SECS, 1.0), point(window_end, 1.0)];
        assert_eq!(classify(&full, window_end), Classification::Complete);

        let short = vec![point(window_end - HOUR_SECS, 1.0)];
        assert_eq!(classify(&short, window_end), Classification::Incomplete);

        assert_eq!(classify(&[], window_end), Classification::Incomplete);
    }

    #[test]
    fn overshooting_last_point_is_not_complete() {
        let window_end = 1_688_169_600;
        let points = vec![point(window_end + HOUR_SECS, 1.0)];
        assert_eq!(classify(&points, window_end), Classification::Incomplete);
    }
}
