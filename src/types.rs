use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array2, Array3, ArrayD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fill value used by AERONET-style validation files for missing measurements
pub const MISSING_SENTINEL: f64 = -999.0;

/// Validation data source families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// AERONET sun photometer sites
    Aeronet,
    /// AERONET ocean color platforms
    AeronetOc,
    /// Maritime Aerosol Network ship measurements
    Man,
    /// PACE-PAX airborne campaign
    PacePax,
    /// EarthCARE lidar profiles
    EarthCare,
}

impl SourceKind {
    /// Sources where every measurement row is treated as its own moving site
    pub fn is_per_row_site(&self) -> bool {
        matches!(self, SourceKind::Man | SourceKind::PacePax | SourceKind::EarthCare)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Aeronet => write!(f, "AERONET"),
            SourceKind::AeronetOc => write!(f, "AERONET_OC"),
            SourceKind::Man => write!(f, "MAN"),
            SourceKind::PacePax => write!(f, "PACE_PAX"),
            SourceKind::EarthCare => write!(f, "EARTHCARE"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = MatchupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AERONET" => Ok(SourceKind::Aeronet),
            "AERONET_OC" => Ok(SourceKind::AeronetOc),
            "MAN" => Ok(SourceKind::Man),
            "PACE_PAX" => Ok(SourceKind::PacePax),
            "EARTHCARE" => Ok(SourceKind::EarthCare),
            other => Err(MatchupError::Config(format!(
                "Unknown validation source: {}",
                other
            ))),
        }
    }
}

/// Longitude/latitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// A validation location for one campaign day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSite {
    /// Position of the site in the list it was loaded from
    pub index: usize,
    pub name: String,
    pub location: GeoPoint,
}

impl ValidationSite {
    pub fn new(index: usize, name: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            index,
            name: name.into(),
            location: GeoPoint::new(lon, lat),
        }
    }
}

/// One timestamped validation measurement; `values` follows `ValidationSeries::variables`
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSample {
    pub time: NaiveDateTime,
    pub values: Vec<f64>,
}

/// Time series of named scalar variables for a single site
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSeries {
    pub site: String,
    pub variables: Vec<String>,
    pub samples: Vec<ValidationSample>,
}

impl ValidationSeries {
    pub fn new(site: impl Into<String>, variables: Vec<String>) -> Self {
        Self {
            site: site.into(),
            variables,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, time: NaiveDateTime, values: Vec<f64>) {
        self.samples.push(ValidationSample { time, values });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Storage of one granule data field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    /// Zero-dimensional value shared by every pixel
    Scalar(f64),
    /// One value per pixel (along-track x cross-track)
    Grid(Array2<f64>),
    /// Pixel grid with a trailing band axis
    Banded(Array3<f64>),
    /// Any other rank; carried through but never aggregated
    Other(ArrayD<f64>),
}

/// Dimensionality class of a field, used for aggregation dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Scalar,
    Grid2D,
    GridWithBand(usize),
    Unsupported(usize),
}

impl FieldData {
    pub fn shape(&self) -> FieldShape {
        match self {
            FieldData::Scalar(_) => FieldShape::Scalar,
            FieldData::Grid(_) => FieldShape::Grid2D,
            FieldData::Banded(cube) => FieldShape::GridWithBand(cube.dim().2),
            FieldData::Other(array) => FieldShape::Unsupported(array.ndim()),
        }
    }

    /// Spatial (rows, cols) extent, if the field has one
    pub fn grid_dim(&self) -> Option<(usize, usize)> {
        match self {
            FieldData::Grid(grid) => Some(grid.dim()),
            FieldData::Banded(cube) => {
                let (rows, cols, _) = cube.dim();
                Some((rows, cols))
            }
            _ => None,
        }
    }
}

/// Named data field of a swath granule
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data: FieldData,
}

impl Field {
    pub fn new(name: impl Into<String>, data: FieldData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn grid(name: impl Into<String>, values: Array2<f64>) -> Self {
        Self::new(name, FieldData::Grid(values))
    }

    pub fn banded(name: impl Into<String>, values: Array3<f64>) -> Self {
        Self::new(name, FieldData::Banded(values))
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, FieldData::Scalar(value))
    }
}

/// One satellite overpass: geolocation grid plus named fields
#[derive(Debug, Clone)]
pub struct SwathGranule {
    /// Acquisition timestamp string as found in the file name (`YYYYMMDDTHHMMSS`)
    pub id: String,
    pub time: NaiveDateTime,
    pub longitude: Array2<f64>,
    pub latitude: Array2<f64>,
    pub fields: Vec<Field>,
    /// Band-axis coordinate of banded fields, in nanometres
    pub wavelengths: Vec<f64>,
}

impl SwathGranule {
    /// Grid dimensions (along-track lines, cross-track pixels)
    pub fn dim(&self) -> (usize, usize) {
        self.longitude.dim()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Closed outline through the four grid corners, for diagnostic maps
    pub fn footprint(&self) -> Vec<GeoPoint> {
        let (rows, cols) = self.dim();
        if rows == 0 || cols == 0 {
            return Vec::new();
        }
        let corners = [
            (0, 0),
            (0, cols - 1),
            (rows - 1, cols - 1),
            (rows - 1, 0),
            (0, 0),
        ];
        corners
            .iter()
            .map(|&(r, c)| GeoPoint::new(self.longitude[[r, c]], self.latitude[[r, c]]))
            .collect()
    }

    /// Copy the band closest to `target` of a banded field into a new 2-D field
    /// named `{field}{target}`, e.g. `aot` at 550 nm becomes `aot550`.
    pub fn extract_nearest_band(&mut self, field: &str, target: f64) -> MatchupResult<String> {
        let band = self
            .wavelengths
            .iter()
            .enumerate()
            .filter(|(_, wl)| wl.is_finite())
            .min_by(|a, b| {
                (a.1 - target)
                    .abs()
                    .partial_cmp(&(b.1 - target).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .ok_or_else(|| {
                MatchupError::Processing(format!(
                    "Granule {} has no wavelength coordinate",
                    self.id
                ))
            })?;

        let source = self.field(field).ok_or_else(|| {
            MatchupError::Processing(format!("Field '{}' not found in granule {}", field, self.id))
        })?;

        let plane = match &source.data {
            FieldData::Banded(cube) if band < cube.dim().2 => {
                cube.index_axis(ndarray::Axis(2), band).to_owned()
            }
            _ => {
                return Err(MatchupError::InvalidFormat(format!(
                    "Field '{}' has no wavelength axis with band {}",
                    field, band
                )))
            }
        };

        let name = format!("{}{}", field, target.round() as i64);
        log::debug!(
            "Extracted {} from {} at {:.1} nm (requested {:.1} nm)",
            name,
            field,
            self.wavelengths[band],
            target
        );
        self.fields.retain(|f| f.name != name);
        self.fields.push(Field::grid(name.clone(), plane));
        Ok(name)
    }
}

/// Row/column position in a granule grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelIndex {
    pub row: usize,
    pub col: usize,
}

/// Nearest-pixel match of one site in one granule
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub site_index: usize,
    pub site: String,
    pub granule_id: String,
    pub granule_time: NaiveDateTime,
    pub pixel: PixelIndex,
    /// Index-space nearest-neighbour distance times 110 km/degree
    pub distance_kdtree_km: f64,
    /// Great-circle distance between site and pixel centre
    pub distance_haversine_km: f64,
    /// Straight line in degrees times 110 km/degree, on the actual coordinates
    pub distance_euclidean_km: f64,
    pub site_location: GeoPoint,
    pub pixel_location: GeoPoint,
}

/// Insertion-ordered name to value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    entries: Vec<(String, f64)>,
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value, keeping the first insertion position
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_nan(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_nan())
    }
}

/// Window statistics for one match; mean and std records come in pairs
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPixelRecord {
    pub geo: GeoMatch,
    pub values: FieldValues,
}

/// Validation statistics over the samples inside one satellite time window
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRow {
    /// Satellite acquisition time this row was matched against
    pub datetime: NaiveDateTime,
    pub site: String,
    /// Number of validation timestamps inside the window
    pub count: usize,
    /// Mean of the matched validation timestamps
    pub datetime_validation: NaiveDateTime,
    pub values: FieldValues,
}

/// One satellite observation paired with its time-window validation statistics
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub satellite_mean: AggregatedPixelRecord,
    pub satellite_std: AggregatedPixelRecord,
    pub validation_mean: ValidationRow,
    pub validation_std: ValidationRow,
}

/// Pipeline stage in which an item was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    SiteLoad,
    GranuleOpen,
    SpatialSearch,
    Aggregate,
    Clean,
    TemporalJoin,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SiteLoad => "site-load",
            Stage::GranuleOpen => "granule-open",
            Stage::SpatialSearch => "spatial-search",
            Stage::Aggregate => "aggregate",
            Stage::Clean => "clean",
            Stage::TemporalJoin => "temporal-join",
        };
        write!(f, "{}", name)
    }
}

/// An item that contributed nothing to the result, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skipped {
    pub item: String,
    pub stage: Stage,
    pub reason: String,
}

impl Skipped {
    pub fn new(item: impl Into<String>, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.item, self.reason)
    }
}

/// Error types for matchup processing
#[derive(Debug, thiserror::Error)]
pub enum MatchupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { column: String, path: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("No usable {kind} validation sites for {day}")]
    NoSites { kind: SourceKind, day: NaiveDate },

    #[error("No matchup found: {reason}")]
    NoMatchup { reason: String },
}

/// Result type for matchup operations
pub type MatchupResult<T> = Result<T, MatchupError>;
