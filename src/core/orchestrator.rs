//! End-to-end matchup of one campaign day
//!
//! ```text
//! Init -> SiteLoad -> SpatialSearch -> Aggregate -> TemporalJoin -> Done
//!            |                              |              |
//!         NoSites                       NoMatchup      NoMatchup
//! ```
//!
//! Granules are opened one at a time and released before the next one is
//! read. Per-item failures are logged and collected in the
//! [`MatchupReport`]; only an empty site list or an empty result ends the run
//! with an error.

use crate::config::MatchupConfig;
use crate::core::spatial_locator::SpatialLocator;
use crate::core::temporal_matcher::TemporalMatcher;
use crate::core::window_aggregator::{PixelAggregate, WindowAggregator};
use crate::io::granule::{check_granule_file, GranuleReader};
use crate::io::table::MatchupTables;
use crate::io::validation::ValidationSource;
use crate::types::{
    FieldValues, GeoMatch, GeoPoint, MatchedPair, MatchupError, MatchupResult, Skipped, Stage,
};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Progress of a matchup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchupState {
    Init,
    SiteLoad,
    SpatialSearch,
    Aggregate,
    TemporalJoin,
    Done,
    NoSites,
    NoMatchup,
}

/// Spatial search result of one granule
#[derive(Debug, Clone)]
pub struct GranuleSearch {
    pub granule_id: String,
    /// Closed corner outline of the swath
    pub footprint: Vec<GeoPoint>,
    pub matches: Vec<GeoMatch>,
}

/// Counters and dropped items of a run
#[derive(Debug, Clone, Default)]
pub struct MatchupReport {
    /// Site x granule pairs searched
    pub total_candidates: usize,
    /// Pairs whose nearest pixel was within the search radius
    pub accepted_matches: usize,
    /// Aggregated records kept after cleaning
    pub aggregated_records: usize,
    pub matched_pairs: usize,
    pub skipped: Vec<Skipped>,
}

impl MatchupReport {
    pub fn skipped_in(&self, stage: Stage) -> impl Iterator<Item = &Skipped> {
        self.skipped.iter().filter(move |s| s.stage == stage)
    }
}

#[derive(Debug, Clone)]
pub struct MatchupOutcome {
    pub pairs: Vec<MatchedPair>,
    pub tables: MatchupTables,
    pub granules: Vec<GranuleSearch>,
    pub report: MatchupReport,
}

/// True when the reference statistic of a mean record is usable. Banded
/// reference fields count when any of their `{field}_wv*` entries is valid;
/// without any reference entry the record is kept unless all values are NaN.
fn has_reference_value(values: &FieldValues, reference: &str) -> bool {
    if let Some(v) = values.get(reference) {
        return !v.is_nan();
    }
    let prefix = format!("{}_wv", reference);
    let mut banded = values.iter().filter(|(name, _)| name.starts_with(&prefix)).peekable();
    if banded.peek().is_some() {
        return banded.any(|(_, v)| !v.is_nan());
    }
    !values.all_nan()
}

/// Drives one day of matchups over injected granule and validation readers
pub struct MatchupOrchestrator<G, V> {
    config: MatchupConfig,
    granules: G,
    validation: V,
    check_files: bool,
    state: MatchupState,
}

impl<G: GranuleReader, V: ValidationSource> MatchupOrchestrator<G, V> {
    pub fn new(config: MatchupConfig, granules: G, validation: V) -> Self {
        Self {
            config,
            granules,
            validation,
            check_files: false,
            state: MatchupState::Init,
        }
    }

    /// Check each granule file on disk (exists, at least
    /// [`crate::io::granule::MIN_GRANULE_BYTES`]) before opening it
    pub fn with_file_check(mut self, enabled: bool) -> Self {
        self.check_files = enabled;
        self
    }

    pub fn config(&self) -> &MatchupConfig {
        &self.config
    }

    pub fn state(&self) -> MatchupState {
        self.state
    }

    /// Match the validation sites of `day` against `granule_paths`
    pub fn run(&mut self, day: NaiveDate, granule_paths: &[PathBuf]) -> MatchupResult<MatchupOutcome> {
        self.state = MatchupState::Init;
        self.config.validate()?;
        let kind = self.validation.kind();
        let mut report = MatchupReport::default();

        log::info!(
            "Starting {} matchup for {} over {} granules ({})",
            kind,
            day,
            granule_paths.len(),
            self.config.rules_tag()
        );

        // Sites
        self.state = MatchupState::SiteLoad;
        let mut sites = self.validation.load_sites(day)?;
        sites.retain(|site| {
            let usable = site.location.is_finite();
            if !usable {
                log::warn!("Site {} has no valid coordinates, skipping", site.name);
                report
                    .skipped
                    .push(Skipped::new(site.name.clone(), Stage::SiteLoad, "non-finite coordinates"));
            }
            usable
        });
        if sites.is_empty() {
            self.state = MatchupState::NoSites;
            log::warn!("No {} sites for {}", kind, day);
            return Err(MatchupError::NoSites { kind, day });
        }
        log::info!("Using {} {} sites", sites.len(), kind);

        // Granules, one at a time
        let aggregator = WindowAggregator::new(self.config.reference_field.clone());
        let mut records: Vec<PixelAggregate> = Vec::new();
        let mut searches = Vec::new();

        for path in granule_paths {
            self.state = MatchupState::SpatialSearch;
            let item = path.display().to_string();

            if self.check_files {
                if let Err(e) = check_granule_file(path) {
                    log::warn!("Skipping granule {}: {}", item, e);
                    report.skipped.push(Skipped::new(item, Stage::GranuleOpen, e.to_string()));
                    continue;
                }
            }

            let mut granule = match self.granules.open(path) {
                Ok(granule) => granule,
                Err(e) => {
                    log::warn!("Cannot open granule {}: {}", item, e);
                    report.skipped.push(Skipped::new(item, Stage::GranuleOpen, e.to_string()));
                    continue;
                }
            };

            for extract in &self.config.band_extracts {
                if let Err(e) = granule.extract_nearest_band(&extract.field, extract.wavelength) {
                    log::warn!("Band extraction failed in {}: {}", granule.id, e);
                    report.skipped.push(Skipped::new(
                        format!("{}/{}", granule.id, extract.field),
                        Stage::GranuleOpen,
                        e.to_string(),
                    ));
                }
            }

            let matches = match SpatialLocator::new(granule.longitude.view(), granule.latitude.view()) {
                Ok(locator) => locator.locate(
                    &sites,
                    self.config.search_center_radius,
                    &granule.id,
                    granule.time,
                ),
                Err(e) => {
                    log::warn!("Spatial search failed for {}: {}", item, e);
                    report.skipped.push(Skipped::new(item, Stage::SpatialSearch, e.to_string()));
                    continue;
                }
            };

            report.total_candidates += sites.len();
            report.accepted_matches += matches.len();
            log::info!(
                "Granule {}: {} of {} sites matched",
                granule.id,
                matches.len(),
                sites.len()
            );

            self.state = MatchupState::Aggregate;
            for geo in &matches {
                let mut aggregate =
                    aggregator.aggregate(&granule, geo, self.config.search_grid_delta, &self.config.rules);
                report.skipped.append(&mut aggregate.skipped);
                records.push(aggregate);
            }

            searches.push(GranuleSearch {
                granule_id: granule.id.clone(),
                footprint: granule.footprint(),
                matches,
            });
        }

        if records.is_empty() {
            self.state = MatchupState::NoMatchup;
            return Err(MatchupError::NoMatchup {
                reason: format!("no {} site within {} km of any granule", kind, self.config.search_center_radius),
            });
        }

        // Clean
        let reference = self.config.reference_field.as_str();
        records.retain(|record| {
            let keep = has_reference_value(&record.mean.values, reference);
            if !keep {
                report.skipped.push(Skipped::new(
                    format!("{}@{}", record.site(), record.mean.geo.granule_id),
                    Stage::Clean,
                    format!("no valid {} pixels in window", reference),
                ));
            }
            keep
        });
        report.aggregated_records = records.len();
        if records.is_empty() {
            self.state = MatchupState::NoMatchup;
            return Err(MatchupError::NoMatchup {
                reason: format!("every matched window was empty after quality filtering on {}", reference),
            });
        }

        // Temporal join, sites in order of first match
        self.state = MatchupState::TemporalJoin;
        let matcher = TemporalMatcher::new(self.config.delta_hour);
        let mut site_order: Vec<&str> = Vec::new();
        for record in &records {
            if !site_order.contains(&record.site()) {
                site_order.push(record.site());
            }
        }

        let mut pairs = Vec::new();
        for site in site_order {
            let series = match self.validation.load_series(day, site) {
                Ok(series) => series,
                Err(e) => {
                    log::warn!("Cannot load validation series for {}: {}", site, e);
                    report.skipped.push(Skipped::new(site, Stage::TemporalJoin, e.to_string()));
                    continue;
                }
            };
            let mut matchup = matcher.match_site(&records, &series);
            pairs.append(&mut matchup.pairs);
            report.skipped.append(&mut matchup.skipped);
        }

        report.matched_pairs = pairs.len();
        if pairs.is_empty() {
            self.state = MatchupState::NoMatchup;
            return Err(MatchupError::NoMatchup {
                reason: format!("no {} measurement within {} h of a satellite overpass", kind, self.config.delta_hour),
            });
        }

        self.state = MatchupState::Done;
        log::info!(
            "Matchup complete: {} candidates, {} accepted, {} aggregated, {} pairs, {} skipped",
            report.total_candidates,
            report.accepted_matches,
            report.aggregated_records,
            report.matched_pairs,
            report.skipped.len()
        );

        Ok(MatchupOutcome {
            tables: MatchupTables::from_pairs(&pairs),
            pairs,
            granules: searches,
            report,
        })
    }
}
