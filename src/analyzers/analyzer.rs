use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::daily::bucket_by_day;
use crate::analyzers::rolling::roll;
use crate::analyzers::threshold::evaluate_guideline;
use crate::analyzers::types::{DailyBucket, ExceedanceFlag, RollingSeries};
use crate::config::PipelineConfig;
use crate::error::{ConfigurationError, MalformedRecordError, PipelineError};
use crate::fetch::{DataSource, ObservationRequest, Segment};
use crate::observation::{IngestOptions, ObservationStore, RawRecord};
use crate::variable::Variable;

/// Everything one run derives from a batch, ready for tabular output.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Observations localized to the configured timezone.
    pub store: ObservationStore,
    pub dropped: Vec<MalformedRecordError>,
    pub rolling: BTreeMap<Variable, RollingSeries>,
    pub daily: Vec<DailyBucket>,
    pub exceedances: Vec<ExceedanceFlag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub timezone: String,
    pub observations: usize,
    pub dropped: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub days: usize,
    pub exceedances: BTreeMap<String, usize>,
}

impl PipelineReport {
    pub fn summary(&self) -> ReportSummary {
        let mut exceedances = BTreeMap::new();
        for flag in &self.exceedances {
            *exceedances.entry(flag.label.clone()).or_insert(0) += 1;
        }

        ReportSummary {
            timezone: self.store.timezone().name().to_string(),
            observations: self.store.len(),
            dropped: self.dropped.len(),
            first: self.store.first_timestamp(),
            last: self.store.last_timestamp(),
            days: self.daily.len(),
            exceedances,
        }
    }
}

/// Observation store → rolling → daily → thresholds, for one validated config.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    options: IngestOptions,
}

impl Pipeline {
    /// # Errors
    ///
    /// [`ConfigurationError`] when the config breaks an invariant, see
    /// [`PipelineConfig::check`]. Nothing has been aggregated at that point.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigurationError> {
        config.check()?;
        Ok(Self {
            config,
            options: IngestOptions::default(),
        })
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Concatenates the segments in order and runs every stage.
    pub fn run<I>(&self, segments: I) -> Result<PipelineReport, PipelineError>
    where
        I: IntoIterator<Item = Segment>,
    {
        let records = segments.into_iter().flat_map(|s| s.records);
        self.run_records(records)
    }

    /// # Errors
    ///
    /// [`PipelineError::EmptyBatch`] when no observation survives ingestion,
    /// [`PipelineError::UnsortedInput`] when sorted input was required.
    pub fn run_records<I>(&self, records: I) -> Result<PipelineReport, PipelineError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let ingested = ObservationStore::ingest(records, self.options)?;
        if ingested.store.is_empty() {
            return Err(PipelineError::EmptyBatch {
                dropped: ingested.dropped.len(),
            });
        }
        let store = ingested.store.localize(self.config.timezone);

        let mut rolling = BTreeMap::new();
        for variable in &self.config.variables {
            let window = self.config.window(*variable);
            let mut series = roll(&store, *variable, window.hours, window.reducer);
            if let Some(min_coverage) = window.min_coverage {
                series = series.masked(min_coverage);
            }
            debug!(
                variable = %variable,
                window_hours = window.hours,
                reducer = window.reducer.as_str(),
                "Rolled series"
            );
            rolling.insert(*variable, series);
        }

        let daily = bucket_by_day(&store, self.config.timezone, &self.config.variables, &rolling);

        let mut exceedances = Vec::new();
        for variable in &self.config.variables {
            for guideline in self.config.guidelines(*variable) {
                let flags = evaluate_guideline(*variable, guideline, rolling.get(variable), &daily);
                if !flags.is_empty() {
                    debug!(
                        variable = %variable,
                        guideline = %guideline.label,
                        count = flags.len(),
                        "Guideline exceeded"
                    );
                }
                exceedances.extend(flags);
            }
        }

        info!(
            observations = store.len(),
            dropped = ingested.dropped.len(),
            days = daily.len(),
            exceedances = exceedances.len(),
            "Pipeline run complete"
        );

        Ok(PipelineReport {
            store,
            dropped: ingested.dropped,
            rolling,
            daily,
            exceedances,
        })
    }
}

/// Fetches the configured location and variables for `[start, end]` and runs the pipeline.
#[tracing::instrument(skip(source, pipeline), fields(start = %start_date, end = %end_date))]
pub async fn analyze<S: DataSource + ?Sized>(
    source: &S,
    pipeline: &Pipeline,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
) -> Result<PipelineReport, PipelineError> {
    let config = pipeline.config();
    let request = ObservationRequest {
        location: config.location,
        variables: config.variables.clone(),
        start_date,
        end_date,
    };

    let segments = source.fetch(&request).await?;
    pipeline.run(segments)
}
