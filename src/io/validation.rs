//! Validation measurement sources
//!
//! Measurements are organised as one folder per campaign day
//! (`<root>/<YYYYMMDD>/*.csv`). For fixed networks (AERONET, AERONET-OC)
//! each file holds one site; for moving platforms (MAN ships, PACE-PAX
//! aircraft, EarthCARE) every row is treated as its own site.

use crate::io::spectral::interpolate_spectrum;
use crate::types::{
    GeoPoint, MatchupError, MatchupResult, SourceKind, ValidationSeries, ValidationSite,
    MISSING_SENTINEL,
};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Accepted date column headers
pub const DATE_COLUMNS: [&str; 3] = ["Date(dd:mm:yyyy)", "Date_(dd:mm:yyyy)", "Date(dd-mm-yyyy)"];
/// Accepted time column headers
pub const TIME_COLUMNS: [&str; 2] = ["Time(hh:mm:ss)", "Time_(hh:mm:ss)"];

pub const SITE_COLUMN: &str = "AERONET_Site";
const SITE_LON_COLUMN: &str = "Site_Longitude(Degrees)";
const SITE_LAT_COLUMN: &str = "Site_Latitude(Degrees)";
const ROW_LON_COLUMN: &str = "Longitude";
const ROW_LAT_COLUMN: &str = "Latitude";
const LIST_NAME_COLUMN: &str = "Site_Name";
const LIST_LON_COLUMN: &str = "Longitude(decimal_degrees)";
const LIST_LAT_COLUMN: &str = "Latitude(decimal_degrees)";

const DATETIME_FORMAT: &str = "%d:%m:%Y %H:%M:%S";

/// Provider of validation sites and their time series for a campaign day
pub trait ValidationSource {
    fn kind(&self) -> SourceKind;

    /// Sites with measurements on `day`, in a stable order
    fn load_sites(&self, day: NaiveDate) -> MatchupResult<Vec<ValidationSite>>;

    /// Time series of one site returned by [`ValidationSource::load_sites`]
    fn load_series(&self, day: NaiveDate, site: &str) -> MatchupResult<ValidationSeries>;
}

/// Which numeric columns become validation variables
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VariableSelector {
    /// Every column with at least one valid number
    #[default]
    All,
    /// Columns named `{prefix}{wavelength}{suffix}`, renamed to
    /// `{rename}{wavelength}`. With non-empty `targets` each row is
    /// interpolated onto those wavelengths instead.
    Spectral {
        prefix: String,
        suffix: String,
        rename: String,
        targets: Vec<f64>,
    },
}

impl VariableSelector {
    /// AERONET `AOD_{λ}nm` columns as `aot_wv{λ}`
    pub fn aeronet_aod(targets: Vec<f64>) -> Self {
        VariableSelector::Spectral {
            prefix: "AOD_".to_string(),
            suffix: "nm".to_string(),
            rename: "aot_wv".to_string(),
            targets,
        }
    }
}

/// One parsed measurement row
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub time: NaiveDateTime,
    /// `AERONET_Site` value, if the file has that column
    pub site: Option<String>,
    /// Per-row position (`Longitude`/`Latitude`)
    pub location: Option<GeoPoint>,
    /// Fixed site position (`Site_Longitude(Degrees)`/`Site_Latitude(Degrees)`)
    pub site_location: Option<GeoPoint>,
    /// Values following [`ValidationFile::variables`]; missing values are NaN
    pub values: Vec<f64>,
}

/// Parsed validation CSV file
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFile {
    pub path: PathBuf,
    pub variables: Vec<String>,
    pub rows: Vec<MeasurementRow>,
}

impl ValidationFile {
    /// Site name from the first row, falling back to the file stem
    pub fn site_name(&self) -> String {
        self.rows
            .iter()
            .find_map(|r| r.site.clone().filter(|s| !s.is_empty()))
            .or_else(|| {
                self.path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }
}

/// Header cleanup: `(int)` markers are removed and whitespace trimmed
fn clean_header(header: &str) -> String {
    header.replace("(int)", "").trim().to_string()
}

fn parse_number(text: &str) -> f64 {
    match text.trim().parse::<f64>() {
        Ok(v) if v == MISSING_SENTINEL => f64::NAN,
        Ok(v) => v,
        Err(_) => f64::NAN,
    }
}

struct RawTable {
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl RawTable {
    fn read(path: &Path) -> MatchupResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(clean_header).collect();
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers, records })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn find_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.column(name))
    }

    fn text(&self, row: usize, col: usize) -> &str {
        self.records[row].get(col).unwrap_or("")
    }

    fn number(&self, row: usize, col: usize) -> f64 {
        parse_number(self.text(row, col))
    }

    fn point(&self, row: usize, lon: Option<usize>, lat: Option<usize>) -> Option<GeoPoint> {
        let point = GeoPoint::new(self.number(row, lon?), self.number(row, lat?));
        point.is_finite().then_some(point)
    }

    fn has_values(&self, col: usize) -> bool {
        (0..self.records.len()).any(|row| self.number(row, col).is_finite())
    }
}

/// Parse `date` and `time` cells; `dd-mm-yyyy` dates are accepted as well
fn parse_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let text = format!("{} {}", date.trim().replace('-', ":"), time.trim());
    NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT).ok()
}

/// Format a wavelength for a column name: integral values without decimals
fn wavelength_label(wavelength: f64) -> String {
    if wavelength.fract() == 0.0 {
        format!("{}", wavelength as i64)
    } else {
        format!("{}", wavelength)
    }
}

/// Read one validation CSV file and select its variables.
///
/// Rows with an unparsable date/time are dropped; `-999` and unparsable
/// numbers become NaN and columns with no valid value are left out.
pub fn parse_validation_file<P: AsRef<Path>>(path: P, selector: &VariableSelector) -> MatchupResult<ValidationFile> {
    let path = path.as_ref();
    let raw = RawTable::read(path)?;
    let missing = |names: &[&str]| MatchupError::MissingColumn {
        column: names.join(" | "),
        path: path.display().to_string(),
    };

    let date_col = raw.find_any(&DATE_COLUMNS).ok_or_else(|| missing(&DATE_COLUMNS))?;
    let time_col = raw.find_any(&TIME_COLUMNS).ok_or_else(|| missing(&TIME_COLUMNS))?;
    let site_col = raw.column(SITE_COLUMN);
    let (site_lon, site_lat) = (raw.column(SITE_LON_COLUMN), raw.column(SITE_LAT_COLUMN));
    let (row_lon, row_lat) = (raw.column(ROW_LON_COLUMN), raw.column(ROW_LAT_COLUMN));

    // (column, variable name, wavelength)
    let mut selected: Vec<(usize, String, f64)> = Vec::new();
    let mut interpolate_to: Option<(String, Vec<f64>)> = None;

    match selector {
        VariableSelector::All => {
            for (col, header) in raw.headers.iter().enumerate() {
                if col == date_col || col == time_col || Some(col) == site_col {
                    continue;
                }
                if raw.has_values(col) {
                    selected.push((col, header.clone(), f64::NAN));
                }
            }
        }
        VariableSelector::Spectral {
            prefix,
            suffix,
            rename,
            targets,
        } => {
            let pattern = Regex::new(&format!(
                r"^{}(\d+(?:\.\d+)?){}$",
                regex::escape(prefix),
                regex::escape(suffix)
            ))
            .map_err(|e| MatchupError::Config(format!("Invalid spectral column pattern: {}", e)))?;

            for (col, header) in raw.headers.iter().enumerate() {
                let wavelength = match pattern
                    .captures(header)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<f64>().ok())
                {
                    Some(wl) => wl,
                    None => continue,
                };
                if raw.has_values(col) {
                    selected.push((col, format!("{}{}", rename, wavelength_label(wavelength)), wavelength));
                }
            }
            if !targets.is_empty() {
                interpolate_to = Some((rename.clone(), targets.clone()));
            }
        }
    }

    let variables: Vec<String> = match &interpolate_to {
        Some((rename, targets)) => targets
            .iter()
            .map(|t| format!("{}{}", rename, t.round() as i64))
            .collect(),
        None => selected.iter().map(|(_, name, _)| name.clone()).collect(),
    };
    let wavelengths: Vec<f64> = selected.iter().map(|(_, _, wl)| *wl).collect();

    let mut rows = Vec::with_capacity(raw.records.len());
    let mut bad_times = 0usize;
    for row in 0..raw.records.len() {
        let time = match parse_datetime(raw.text(row, date_col), raw.text(row, time_col)) {
            Some(time) => time,
            None => {
                bad_times += 1;
                continue;
            }
        };

        let measured: Vec<f64> = selected.iter().map(|(col, _, _)| raw.number(row, *col)).collect();
        let values = match &interpolate_to {
            Some((_, targets)) => interpolate_spectrum(&wavelengths, &measured, targets),
            None => measured,
        };

        rows.push(MeasurementRow {
            time,
            site: site_col.map(|col| raw.text(row, col).to_string()),
            location: raw.point(row, row_lon, row_lat),
            site_location: raw.point(row, site_lon, site_lat),
            values,
        });
    }

    if bad_times > 0 {
        log::warn!("Dropped {} rows with unparsable date/time in {}", bad_times, path.display());
    }
    log::debug!(
        "Read {} rows and {} variables from {}",
        rows.len(),
        variables.len(),
        path.display()
    );

    Ok(ValidationFile {
        path: path.to_path_buf(),
        variables,
        rows,
    })
}

/// Read a site list with `Site_Name`, `Longitude(decimal_degrees)` and
/// `Latitude(decimal_degrees)` columns
pub fn read_site_list<P: AsRef<Path>>(path: P) -> MatchupResult<Vec<ValidationSite>> {
    let path = path.as_ref();
    let raw = RawTable::read(path)?;
    let column = |name: &str| {
        raw.column(name).ok_or_else(|| MatchupError::MissingColumn {
            column: name.to_string(),
            path: path.display().to_string(),
        })
    };
    let name_col = column(LIST_NAME_COLUMN)?;
    let lon_col = column(LIST_LON_COLUMN)?;
    let lat_col = column(LIST_LAT_COLUMN)?;

    Ok((0..raw.records.len())
        .map(|row| {
            ValidationSite::new(
                row,
                raw.text(row, name_col),
                raw.number(row, lon_col),
                raw.number(row, lat_col),
            )
        })
        .collect())
}

/// CSV day-folder validation source
#[derive(Debug, Clone)]
pub struct CsvValidationSource {
    root: PathBuf,
    kind: SourceKind,
    site_list: Option<PathBuf>,
    selector: VariableSelector,
}

impl CsvValidationSource {
    pub fn new(root: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            root: root.into(),
            kind,
            site_list: None,
            selector: VariableSelector::All,
        }
    }

    /// Take fixed-site coordinates from a site list instead of the data files
    pub fn with_site_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.site_list = Some(path.into());
        self
    }

    pub fn with_selector(mut self, selector: VariableSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day.format("%Y%m%d").to_string())
    }

    fn day_files(&self, day: NaiveDate) -> MatchupResult<Vec<PathBuf>> {
        let dir = self.day_dir(day);
        if !dir.is_dir() {
            log::warn!("No {} folder for {}: {}", self.kind, day, dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("csv") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse every file of the day; unreadable files are logged and skipped
    fn load_day(&self, day: NaiveDate) -> MatchupResult<Vec<ValidationFile>> {
        let mut parsed = Vec::new();
        for path in self.day_files(day)? {
            match parse_validation_file(&path, &self.selector) {
                Ok(file) => parsed.push(file),
                Err(e) => log::warn!("Skipping validation file {}: {}", path.display(), e),
            }
        }
        Ok(parsed)
    }

    fn site_coordinates(&self) -> MatchupResult<HashMap<String, GeoPoint>> {
        match &self.site_list {
            Some(path) => Ok(read_site_list(path)?
                .into_iter()
                .map(|site| (site.name, site.location))
                .collect()),
            None => Ok(HashMap::new()),
        }
    }

    /// Per-row sites are named `{site}_p{i}`, `i` being the row index within
    /// its file. When two files produce the same name the first one wins.
    fn row_sites(files: &[ValidationFile]) -> Vec<(usize, String, &ValidationFile, usize)> {
        let mut seen = HashSet::new();
        let mut sites = Vec::new();
        for file in files {
            let fallback = file.site_name();
            for (i, row) in file.rows.iter().enumerate() {
                let base = row.site.as_deref().filter(|s| !s.is_empty()).unwrap_or(&fallback);
                let name = format!("{}_p{}", base, i);
                if seen.insert(name.clone()) {
                    sites.push((sites.len(), name, file, i));
                } else {
                    log::debug!("Duplicate row site {} in {}", name, file.path.display());
                }
            }
        }
        sites
    }
}

impl ValidationSource for CsvValidationSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn load_sites(&self, day: NaiveDate) -> MatchupResult<Vec<ValidationSite>> {
        let files = self.load_day(day)?;

        let sites: Vec<ValidationSite> = if self.kind.is_per_row_site() {
            Self::row_sites(&files)
                .into_iter()
                .filter_map(|(n, name, file, i)| {
                    let location = file.rows[i].location?;
                    Some(ValidationSite::new(n, name, location.lon, location.lat))
                })
                .collect()
        } else {
            let listed = self.site_coordinates()?;
            files
                .iter()
                .enumerate()
                .filter_map(|(index, file)| {
                    let name = file.site_name();
                    let location = listed
                        .get(&name)
                        .copied()
                        .filter(GeoPoint::is_finite)
                        .or_else(|| file.rows.iter().find_map(|r| r.site_location))
                        .or_else(|| file.rows.iter().find_map(|r| r.location));
                    match location {
                        Some(p) => Some(ValidationSite::new(index, name, p.lon, p.lat)),
                        None => {
                            log::warn!("No coordinates for site {} in {}", name, file.path.display());
                            None
                        }
                    }
                })
                .collect()
        };

        log::info!("Loaded {} {} sites for {}", sites.len(), self.kind, day);
        Ok(sites)
    }

    fn load_series(&self, day: NaiveDate, site: &str) -> MatchupResult<ValidationSeries> {
        let files = self.load_day(day)?;
        let not_found = || MatchupError::Processing(format!("No {} data for site {} on {}", self.kind, site, day));

        if self.kind.is_per_row_site() {
            let (_, name, file, i) = Self::row_sites(&files)
                .into_iter()
                .find(|(_, name, _, _)| name == site)
                .ok_or_else(not_found)?;
            let row = &file.rows[i];
            let mut series = ValidationSeries::new(name, file.variables.clone());
            series.push(row.time, row.values.clone());
            return Ok(series);
        }

        let file = files.iter().find(|f| f.site_name() == site).ok_or_else(not_found)?;
        let mut series = ValidationSeries::new(site, file.variables.clone());
        for row in &file.rows {
            series.push(row.time, row.values.clone());
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
    }

    fn write_day(root: &Path, name: &str, content: &str) -> PathBuf {
        let dir = root.join("20240302");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_flexible_columns_and_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_day(
            dir.path(),
            "Lanai.csv",
            "AERONET_Site,Date_(dd:mm:yyyy),Time_(hh:mm:ss),Day_of_Year(int),AOD_500nm,AOD_1640nm\n\
             Lanai,02:03:2024,13:10:00,62,0.12,-999\n\
             Lanai,02-03-2024,14:50:00,62,-999,-999\n\
             Lanai,bad,14:55:00,62,0.3,-999\n",
        );

        let file = parse_validation_file(&path, &VariableSelector::All).unwrap();
        assert_eq!(file.variables, vec!["Day_of_Year", "AOD_500nm"]);
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.rows[1].time, day().and_hms_opt(14, 50, 0).unwrap());
        assert_relative_eq!(file.rows[0].values[1], 0.12);
        assert!(file.rows[1].values[1].is_nan());
        assert_eq!(file.site_name(), "Lanai");
    }

    #[test]
    fn test_missing_date_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_day(dir.path(), "x.csv", "Time(hh:mm:ss),AOD_500nm\n13:00:00,0.1\n");
        match parse_validation_file(&path, &VariableSelector::All) {
            Err(MatchupError::MissingColumn { column, .. }) => assert!(column.contains("Date(dd:mm:yyyy)")),
            other => panic!("expected missing column error, got {:?}", other.map(|f| f.variables)),
        }
    }

    #[test]
    fn test_spectral_selection_and_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_day(
            dir.path(),
            "Lanai.csv",
            "Date(dd:mm:yyyy),Time(hh:mm:ss),AOD_440nm,AOD_500nm,AOD_675nm,AOD_870nm,Precipitable_Water(cm)\n\
             02:03:2024,13:10:00,0.76,0.7,0.525,0.33,1.2\n",
        );

        let renamed = parse_validation_file(&path, &VariableSelector::aeronet_aod(Vec::new())).unwrap();
        assert_eq!(renamed.variables, vec!["aot_wv440", "aot_wv500", "aot_wv675", "aot_wv870"]);

        let interpolated = parse_validation_file(&path, &VariableSelector::aeronet_aod(vec![550.0])).unwrap();
        assert_eq!(interpolated.variables, vec!["aot_wv550"]);
        // Linear spectrum 1.2 - λ/1000 is reproduced by the cubic spline
        assert_relative_eq!(interpolated.rows[0].values[0], 0.65, epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_sites_use_site_list_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let header = "AERONET_Site,Date(dd:mm:yyyy),Time(hh:mm:ss),Site_Longitude(Degrees),Site_Latitude(Degrees),AOD_500nm\n";
        write_day(dir.path(), "Lanai.csv", &format!("{}Lanai,02:03:2024,13:10:00,-156.9,20.7,0.1\n", header));
        write_day(dir.path(), "Hilo.csv", &format!("{}Hilo,02:03:2024,13:10:00,-155.0,19.7,0.2\n", header));
        let list = dir.path().join("sites.csv");
        fs::write(&list, "Site_Name,Longitude(decimal_degrees),Latitude(decimal_degrees)\nHilo,-155.1,19.8\n").unwrap();

        let source = CsvValidationSource::new(dir.path(), SourceKind::Aeronet).with_site_list(&list);
        let sites = source.load_sites(day()).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].name, "Hilo");
        assert_eq!(sites[0].location, GeoPoint::new(-155.1, 19.8));
        assert_eq!(sites[1].name, "Lanai");
        assert_eq!(sites[1].location, GeoPoint::new(-156.9, 20.7));

        let series = source.load_series(day(), "Lanai").unwrap();
        assert_eq!(series.len(), 1);
        assert!(source.load_series(day(), "Nowhere").is_err());
    }

    #[test]
    fn test_per_row_sites() {
        let dir = tempfile::tempdir().unwrap();
        write_day(
            dir.path(),
            "cruise.csv",
            "AERONET_Site,Date(dd:mm:yyyy),Time(hh:mm:ss),Latitude,Longitude,AOD_500nm\n\
             Ship_A,02:03:2024,13:00:00,20.1,-157.0,0.1\n\
             Ship_A,02:03:2024,13:30:00,,,0.2\n\
             Ship_A,02:03:2024,14:00:00,20.3,-157.2,0.3\n",
        );

        let source = CsvValidationSource::new(dir.path(), SourceKind::Man);
        let sites = source.load_sites(day()).unwrap();
        let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Ship_A_p0", "Ship_A_p2"]);
        assert_eq!(sites[1].location, GeoPoint::new(-157.2, 20.3));

        let series = source.load_series(day(), "Ship_A_p2").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.samples[0].time, day().and_hms_opt(14, 0, 0).unwrap());
    }

    #[test]
    fn test_row_sites_numbered_within_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let header = "AERONET_Site,Date(dd:mm:yyyy),Time(hh:mm:ss),Latitude,Longitude,AOD_500nm\n";
        write_day(
            dir.path(),
            "Ship_A.csv",
            &format!("{}Ship_A,02:03:2024,13:00:00,20.1,-157.0,0.1\n", header),
        );
        write_day(
            dir.path(),
            "Ship_B.csv",
            &format!(
                "{}Ship_B,02:03:2024,13:00:00,21.1,-158.0,0.4\nShip_B,02:03:2024,13:30:00,21.2,-158.1,0.5\n",
                header
            ),
        );
        // Repeats Ship_A_p0 and is ignored
        write_day(
            dir.path(),
            "Ship_C.csv",
            &format!("{}Ship_A,02:03:2024,18:00:00,25.0,-150.0,0.9\n", header),
        );

        let source = CsvValidationSource::new(dir.path(), SourceKind::Man);
        let sites = source.load_sites(day()).unwrap();
        let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Ship_A_p0", "Ship_B_p0", "Ship_B_p1"]);
        assert_eq!(sites[0].location, GeoPoint::new(-157.0, 20.1));

        let series = source.load_series(day(), "Ship_A_p0").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.samples[0].time, day().and_hms_opt(13, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_day_folder_yields_no_sites() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvValidationSource::new(dir.path(), SourceKind::AeronetOc);
        assert!(source.load_sites(day()).unwrap().is_empty());
    }
}
