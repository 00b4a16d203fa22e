//! Warehouse row schema, CSV encoding, and the Dune table sink.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::provider::OhlcvPoint;

pub const DUNE_API_BASE_URL: &str = "https://api.dune.com/api/v1";
pub const WAREHOUSE_CSV_HEADERS: [&str; 7] = ["mint", "block_time", "o", "h", "l", "c", "v"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRow {
    pub mint: String,
    pub block_time: String,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("CSV encode error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV buffer error: {0}")]
    CsvBuffer(String),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("warehouse request failed for table {table}: {message}")]
    HttpRequest { table: String, message: String },
    #[error("malformed warehouse response: {0}")]
    MalformedResponse(String),
}

/// Fixed UTC wall-clock format with millisecond precision; out-of-range
/// timestamps render as the empty string, matching the loose varchar
/// column.
pub fn format_block_time(unix_ts: i64) -> String {
    Utc.timestamp_opt(unix_ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_default()
}

pub fn price_rows(points: &[OhlcvPoint]) -> Vec<PriceRow> {
    points
        .iter()
        .map(|point| PriceRow {
            mint: point.address.clone(),
            block_time: format_block_time(point.unix_time),
            o: point.o,
            h: point.h,
            l: point.l,
            c: point.c,
            v: point.v,
        })
        .collect()
}

pub fn rows_to_csv(rows: &[PriceRow]) -> Result<String, WarehouseError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(WAREHOUSE_CSV_HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| WarehouseError::CsvBuffer(err.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Appends rows to the remote table; returns the row count written.
    async fn append_rows(&self, rows: &[PriceRow]) -> Result<u64, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuneConfig {
    pub api_key: String,
    pub namespace: String,
    pub table_name: String,
    pub base_url: String,
    pub http_timeout_ms: u64,
}

impl DuneConfig {
    pub fn new(
        api_key: impl Into<String>,
        namespace: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            namespace: namespace.into(),
            table_name: table_name.into(),
            base_url: DUNE_API_BASE_URL.to_string(),
            http_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    rows_written: u64,
}

pub struct DuneWarehouse {
    client: reqwest::Client,
    cfg: DuneConfig,
}

impl DuneWarehouse {
    pub fn new(cfg: DuneConfig) -> Result<Self, WarehouseError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|err| WarehouseError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }

    /// One-time table creation with the fixed column schema. Never
    /// invoked by the sync loop itself.
    pub async fn create_table(&self) -> Result<(), WarehouseError> {
        let url = format!("{}/table/create", self.cfg.base_url);
        let schema = serde_json::json!({
            "namespace": self.cfg.namespace,
            "table_name": self.cfg.table_name,
            "schema": [
                {"name": "mint", "type": "varchar"},
                {"name": "block_time", "type": "varchar"},
                {"name": "o", "type": "double"},
                {"name": "h", "type": "double"},
                {"name": "l", "type": "double"},
                {"name": "c", "type": "double"},
                {"name": "v", "type": "double"},
            ],
        });

        let response = self
            .client
            .post(&url)
            .header("X-DUNE-API-KEY", &self.cfg.api_key)
            .json(&schema)
            .send()
            .await
            .map_err(|err| WarehouseError::HttpRequest {
                table: self.cfg.table_name.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WarehouseError::HttpRequest {
                table: self.cfg.table_name.clone(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        info!(
            component = "warehouse",
            event = "warehouse.table.created",
            namespace = %self.cfg.namespace,
            table = %self.cfg.table_name
        );
        Ok(())
    }
}

#[async_trait]
impl WarehouseSink for DuneWarehouse {
    async fn append_rows(&self, rows: &[PriceRow]) -> Result<u64, WarehouseError> {
        let payload = rows_to_csv(rows)?;
        let url = format!(
            "{}/table/{}/{}/insert",
            self.cfg.base_url, self.cfg.namespace, self.cfg.table_name
        );

        let response = self
            .client
            .post(&url)
            .header("X-DUNE-API-KEY", &self.cfg.api_key)
            .header("Content-Type", "text/csv")
            .body(payload)
            .send()
            .await
            .map_err(|err| WarehouseError::HttpRequest {
                table: self.cfg.table_name.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WarehouseError::HttpRequest {
                table: self.cfg.table_name.clone(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        let inserted: InsertResponse = response
            .json()
            .await
            .map_err(|err| WarehouseError::MalformedResponse(err.to_string()))?;

        info!(
            component = "warehouse",
            event = "warehouse.append",
            table = %self.cfg.table_name,
            rows_written = inserted.rows_written
        );
        Ok(inserted.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(unix_time: i64, v: f64) -> OhlcvPoint {
        OhlcvPoint {
            address: "mint-a".to_string(),
            unix_time,
            o: 1.25,
            h: 2.5,
            l: 0.75,
            c: 1.0,
            v,
        }
    }

    #[test]
    fn block_time_uses_utc_millisecond_format() {
        assert_eq!(
            format_block_time(1_688_169_600),
            "2023-07-01 00:00:00.000 UTC"
        );
        assert_eq!(
            format_block_time(1_685_581_200),
            "2023-06-01 01:00:00.000 UTC"
        );
    }

    #[test]
    fn csv_payload_has_fixed_header_order() {
        let rows = price_rows(&[point(1_688_169_600, 10.0)]);
        let csv = rows_to_csv(&rows).unwrap();

        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("mint,block_time,o,h,l,c,v"));
        assert_eq!(
            lines.next(),
            Some("mint-a,2023-07-01 00:00:00.000 UTC,1.25,2.5,0.75,1.0,10.0")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn csv_preserves_point_order() {
        let rows = price_rows(&[point(1_685_581_200, 1.0), point(1_685_584_800, 2.0)]);
        let csv = rows_to_csv(&rows).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("2023-06-01 01:00:00.000 UTC"));
        assert!(lines[2].contains("2023-06-01 02:00:00.000 UTC"));
    }

    #[test]
    fn empty_row_list_still_emits_the_header() {
        let csv = rows_to_csv(&[]).unwrap();
        assert_eq!(csv.trim_end(), "mint,block_time,o,h,l,c,v");
    }
}
