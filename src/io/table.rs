//! Result tables and their CSV export

use crate::types::{AggregatedPixelRecord, MatchedPair, MatchupResult, ValidationRow};
use chrono::NaiveDateTime;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Leading columns of the satellite tables; field statistics follow
pub const SATELLITE_COLUMNS: [&str; 13] = [
    "datetime",
    "granule",
    "site_index",
    "site",
    "site_lon",
    "site_lat",
    "pixel_lon",
    "pixel_lat",
    "pixel_row",
    "pixel_col",
    "distance0_kdtree",
    "distance1_haversine",
    "distance2_euclidean",
];

/// Leading columns of the validation tables; variable statistics follow
pub const VALIDATION_COLUMNS: [&str; 4] = ["datetime", "site", "count", "datetime_validation"];

/// One table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
    Time(NaiveDateTime),
    Empty,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) if v.is_nan() => Ok(()),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Cell::Empty => Ok(()),
        }
    }
}

/// Column-named rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Write with a header line; NaN is written as an empty field
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> MatchupResult<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        writer.flush()?;
        log::debug!("Wrote {} rows to {}", self.rows.len(), path.as_ref().display());
        Ok(())
    }
}

/// Union of the value names of `records`, in order of first appearance
fn value_columns<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns: Vec<String> = Vec::new();
    for name in names {
        if !columns.iter().any(|c| c == name) {
            columns.push(name.to_string());
        }
    }
    columns
}

fn satellite_table(records: &[&AggregatedPixelRecord]) -> Table {
    let values = value_columns(records.iter().flat_map(|r| r.values.names()));
    let mut table = Table::new(
        SATELLITE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(values.iter().cloned())
            .collect(),
    );

    for record in records {
        let geo = &record.geo;
        let mut row = vec![
            Cell::Time(geo.granule_time),
            Cell::Text(geo.granule_id.clone()),
            Cell::Int(geo.site_index as i64),
            Cell::Text(geo.site.clone()),
            Cell::Float(geo.site_location.lon),
            Cell::Float(geo.site_location.lat),
            Cell::Float(geo.pixel_location.lon),
            Cell::Float(geo.pixel_location.lat),
            Cell::Int(geo.pixel.row as i64),
            Cell::Int(geo.pixel.col as i64),
            Cell::Float(geo.distance_kdtree_km),
            Cell::Float(geo.distance_haversine_km),
            Cell::Float(geo.distance_euclidean_km),
        ];
        row.extend(
            values
                .iter()
                .map(|name| record.values.get(name).map_or(Cell::Empty, Cell::Float)),
        );
        table.rows.push(row);
    }
    table
}

fn validation_table(rows: &[&ValidationRow]) -> Table {
    let values = value_columns(rows.iter().flat_map(|r| r.values.names()));
    let mut table = Table::new(
        VALIDATION_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(values.iter().cloned())
            .collect(),
    );

    for source in rows {
        let mut row = vec![
            Cell::Time(source.datetime),
            Cell::Text(source.site.clone()),
            Cell::Int(source.count as i64),
            Cell::Time(source.datetime_validation),
        ];
        row.extend(
            values
                .iter()
                .map(|name| source.values.get(name).map_or(Cell::Empty, Cell::Float)),
        );
        table.rows.push(row);
    }
    table
}

/// The four output tables, row-aligned: row `i` of every table describes pair `i`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchupTables {
    pub satellite_mean: Table,
    pub satellite_std: Table,
    pub validation_mean: Table,
    pub validation_std: Table,
}

impl MatchupTables {
    pub fn from_pairs(pairs: &[MatchedPair]) -> Self {
        let sat_mean: Vec<_> = pairs.iter().map(|p| &p.satellite_mean).collect();
        let sat_std: Vec<_> = pairs.iter().map(|p| &p.satellite_std).collect();
        let val_mean: Vec<_> = pairs.iter().map(|p| &p.validation_mean).collect();
        let val_std: Vec<_> = pairs.iter().map(|p| &p.validation_std).collect();

        Self {
            satellite_mean: satellite_table(&sat_mean),
            satellite_std: satellite_table(&sat_std),
            validation_mean: validation_table(&val_mean),
            validation_std: validation_table(&val_std),
        }
    }

    pub fn len(&self) -> usize {
        self.satellite_mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellite_mean.is_empty()
    }

    /// Write `satellite_mean.csv`, `satellite_std.csv`, `validation_mean.csv`
    /// and `validation_std.csv` into `dir`, creating it if needed
    pub fn write_dir<P: AsRef<Path>>(&self, dir: P) -> MatchupResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        log::info!("Writing matchup tables to {}", dir.display());

        let mut written = Vec::with_capacity(4);
        for (name, table) in [
            ("satellite_mean.csv", &self.satellite_mean),
            ("satellite_std.csv", &self.satellite_std),
            ("validation_mean.csv", &self.validation_mean),
            ("validation_std.csv", &self.validation_std),
        ] {
            let path = dir.join(name);
            table.write_csv(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}
