//! narwhal: spatiotemporal matchup of satellite swaths with validation measurements
//!
//! Validation sites (AERONET, AERONET-OC, MAN, PACE-PAX, EarthCARE) are located
//! in each satellite granule with a nearest-neighbour search, the surrounding
//! pixel window is quality-filtered and aggregated, and the resulting records
//! are paired with the validation time series inside a symmetric time window.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use config::{BandExtract, MatchupConfig, QualityRule, RuleSet, RuleValue};
pub use types::{
    AggregatedPixelRecord, Field, FieldData, FieldShape, FieldValues, GeoMatch, GeoPoint, MatchedPair,
    MatchupError, MatchupResult, PixelIndex, Skipped, SourceKind, Stage, SwathGranule, ValidationRow,
    ValidationSeries, ValidationSite, MISSING_SENTINEL,
};

pub use crate::core::{
    MatchupOrchestrator, MatchupOutcome, MatchupReport, QualityFilter, SpatialLocator, TemporalMatcher,
    WindowAggregator,
};
pub use io::{CsvValidationSource, GranuleReader, MatchupTables, ValidationSource, VariableSelector};
