//! Core matchup processing modules

pub mod orchestrator;
pub mod quality_filter;
pub mod spatial_locator;
pub mod statistics;
pub mod temporal_matcher;
pub mod window_aggregator;

// Re-export main types
pub use orchestrator::{GranuleSearch, MatchupOrchestrator, MatchupOutcome, MatchupReport, MatchupState};
pub use quality_filter::{FilterOutcome, GridFields, QualityFilter};
pub use spatial_locator::{euclidean_km, haversine_km, NearestPixel, SpatialLocator, EARTH_RADIUS_KM, KM_PER_DEGREE};
pub use temporal_matcher::{SiteMatchup, TemporalMatcher};
pub use window_aggregator::{window_bounds, PixelAggregate, WindowAggregator};
