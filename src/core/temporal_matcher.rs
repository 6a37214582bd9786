//! Pairing of aggregated satellite records with validation time series
//!
//! Each satellite record at time `t` is compared against the validation
//! samples in the closed window `[t - delta, t + delta]`. Records whose window
//! holds no usable measurement are dropped together with their satellite
//! counterpart, so every emitted [`MatchedPair`] is complete.

use crate::core::statistics::{nan_mean, nan_sample_std};
use crate::core::window_aggregator::PixelAggregate;
use crate::types::{
    FieldValues, MatchedPair, Skipped, Stage, ValidationRow, ValidationSample, ValidationSeries,
    MISSING_SENTINEL,
};
use crate::config::MAX_DELTA_HOUR;
use chrono::{Duration, NaiveDateTime};

/// Matched pairs of one site, in satellite record order
#[derive(Debug, Clone, Default)]
pub struct SiteMatchup {
    pub site: String,
    pub pairs: Vec<MatchedPair>,
    pub skipped: Vec<Skipped>,
}

pub struct TemporalMatcher {
    delta: Duration,
}

impl TemporalMatcher {
    /// Symmetric half-width of the window, in hours, clamped to
    /// `[0, MAX_DELTA_HOUR]`
    pub fn new(delta_hours: f64) -> Self {
        let hours = if delta_hours.is_nan() {
            0.0
        } else {
            delta_hours.clamp(0.0, MAX_DELTA_HOUR)
        };
        Self {
            delta: Duration::milliseconds((hours * 3_600_000.0).round() as i64),
        }
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Closed window bounds around `time`
    pub fn window(&self, time: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        (
            time.checked_sub_signed(self.delta).unwrap_or(NaiveDateTime::MIN),
            time.checked_add_signed(self.delta).unwrap_or(NaiveDateTime::MAX),
        )
    }

    /// Pair every record of `series.site` with its window statistics.
    /// Records of other sites are ignored.
    pub fn match_site(&self, records: &[PixelAggregate], series: &ValidationSeries) -> SiteMatchup {
        let mut result = SiteMatchup {
            site: series.site.clone(),
            ..SiteMatchup::default()
        };

        for record in records.iter().filter(|r| r.site() == series.site) {
            let time = record.mean.geo.granule_time;
            let item = format!("{}@{}", series.site, record.mean.geo.granule_id);

            match self.summarize(time, series) {
                Ok((validation_mean, validation_std)) => {
                    result.pairs.push(MatchedPair {
                        satellite_mean: record.mean.clone(),
                        satellite_std: record.std.clone(),
                        validation_mean,
                        validation_std,
                    });
                }
                Err(reason) => {
                    log::debug!("No validation match for {}: {}", item, reason);
                    result.skipped.push(Skipped::new(item, Stage::TemporalJoin, reason));
                }
            }
        }

        log::debug!(
            "Site {}: {} matched pairs, {} records without validation",
            series.site,
            result.pairs.len(),
            result.skipped.len()
        );
        result
    }

    /// Mean and sample-std rows of the samples within the window of `time`
    fn summarize(
        &self,
        time: NaiveDateTime,
        series: &ValidationSeries,
    ) -> Result<(ValidationRow, ValidationRow), String> {
        let (start, end) = self.window(time);
        let in_window: Vec<&ValidationSample> = series
            .samples
            .iter()
            .filter(|s| s.time >= start && s.time <= end)
            .collect();

        let first = match in_window.first() {
            Some(sample) => sample.time,
            None => return Err(format!("no samples within {} of {}", self.delta, time)),
        };

        let mut mean = FieldValues::new();
        let mut std = FieldValues::new();
        for (i, variable) in series.variables.iter().enumerate() {
            let values: Vec<f64> = in_window
                .iter()
                .map(|s| match s.values.get(i) {
                    Some(&v) if v != MISSING_SENTINEL => v,
                    _ => f64::NAN,
                })
                .collect();
            mean.insert(variable.clone(), nan_mean(&values));
            std.insert(variable.clone(), nan_sample_std(&values));
        }

        if mean.all_nan() {
            return Err(format!(
                "all {} samples within window of {} are missing",
                in_window.len(),
                time
            ));
        }

        let offset_ms = in_window
            .iter()
            .map(|s| (s.time - first).num_milliseconds() as f64)
            .sum::<f64>()
            / in_window.len() as f64;
        let datetime_validation = first + Duration::milliseconds(offset_ms.round() as i64);

        let row = |values| ValidationRow {
            datetime: time,
            site: series.site.clone(),
            count: in_window.len(),
            datetime_validation,
            values,
        };
        Ok((row(mean), row(std)))
    }
}
