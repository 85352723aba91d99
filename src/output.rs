//! Tabular output of a pipeline run.
//!
//! Each derived series is flattened into plain rows keyed by timestamp or
//! date and written as CSV, optionally gzip-compressed.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::PipelineReport;
use crate::analyzers::types::Period;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingRow {
    /// RFC 3339 in the configured timezone.
    pub timestamp: String,
    pub variable: &'static str,
    pub window_hours: u32,
    pub reducer: &'static str,
    pub value: Option<f64>,
    pub samples: usize,
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub variable: &'static str,
    pub observations: usize,
    pub samples: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub rolling_samples: Option<usize>,
    pub rolling_mean: Option<f64>,
    pub rolling_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceedanceRow {
    pub variable: &'static str,
    pub resolution: &'static str,
    pub period: String,
    pub statistic: &'static str,
    pub observed: f64,
    pub comparator: &'static str,
    pub threshold: f64,
    pub label: String,
}

pub fn rolling_rows(report: &PipelineReport) -> Vec<RollingRow> {
    let tz = report.store.timezone();
    report
        .rolling
        .values()
        .flat_map(|series| {
            series.points.iter().map(move |p| RollingRow {
                timestamp: p.timestamp.with_timezone(&tz).to_rfc3339(),
                variable: series.variable.as_str(),
                window_hours: series.window_hours,
                reducer: series.reducer.as_str(),
                value: p.value,
                samples: p.samples,
                coverage: p.coverage(series.window_hours),
            })
        })
        .collect()
}

pub fn daily_rows(report: &PipelineReport) -> Vec<DailyRow> {
    report
        .daily
        .iter()
        .flat_map(|bucket| {
            bucket.variables.iter().map(move |(variable, summary)| DailyRow {
                date: bucket.date,
                variable: variable.as_str(),
                observations: bucket.observations,
                samples: summary.raw.samples,
                mean: summary.raw.mean,
                min: summary.raw.min,
                max: summary.raw.max,
                rolling_samples: summary.rolling.map(|r| r.samples),
                rolling_mean: summary.rolling.and_then(|r| r.mean),
                rolling_max: summary.rolling.and_then(|r| r.max),
            })
        })
        .collect()
}

pub fn exceedance_rows(report: &PipelineReport) -> Vec<ExceedanceRow> {
    let tz = report.store.timezone();
    report
        .exceedances
        .iter()
        .map(|flag| {
            let (resolution, period) = match flag.period {
                Period::Hour(t) => ("hour", t.with_timezone(&tz).to_rfc3339()),
                Period::Day(d) => ("day", d.to_string()),
            };
            ExceedanceRow {
                variable: flag.variable.as_str(),
                resolution,
                period,
                statistic: flag.statistic.as_str(),
                observed: flag.observed,
                comparator: flag.comparator.symbol(),
                threshold: flag.threshold,
                label: flag.label.clone(),
            }
        })
        .collect()
}

/// Writes `rows` with a header line to `path`, replacing any existing file.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T], gzip: bool) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), gzip, "Writing CSV");

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;

    if gzip {
        let encoder = GzEncoder::new(file, Compression::default());
        let encoder = write_rows(encoder, rows)?;
        encoder.finish()?;
    } else {
        write_rows(file, rows)?;
    }

    Ok(())
}

fn write_rows<W: Write, T: Serialize>(inner: W, rows: &[T]) -> Result<W> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(inner);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV writer: {}", e.error()))
}

/// Writes `rolling`, `daily` and `exceedances` tables into `dir`.
///
/// Returns the paths written, `.csv.gz` when `gzip` is set.
pub fn write_report(dir: &Path, report: &PipelineReport, gzip: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let ext = if gzip { "csv.gz" } else { "csv" };
    let rolling = dir.join(format!("rolling.{ext}"));
    let daily = dir.join(format!("daily.{ext}"));
    let exceedances = dir.join(format!("exceedances.{ext}"));

    write_csv(&rolling, &rolling_rows(report), gzip)?;
    write_csv(&daily, &daily_rows(report), gzip)?;
    write_csv(&exceedances, &exceedance_rows(report), gzip)?;

    info!(dir = %dir.display(), gzip, "Report tables written");
    Ok(vec![rolling, daily, exceedances])
}

/// Logs the run summary using Rust's debug pretty-print format.
pub fn print_pretty(report: &PipelineReport) {
    debug!("{:#?}", report.summary());
}

/// Logs the run summary as pretty-printed JSON.
pub fn print_json(report: &PipelineReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(&report.summary())?);
    Ok(())
}
