//! Input/output: granule readers, validation sources and result tables

pub mod dedup;
pub mod granule;
pub mod spectral;
pub mod table;
pub mod validation;

#[cfg(feature = "gdal")]
pub mod gdal_reader;

pub use dedup::{remove_duplicate_rows, AERONET_DEDUP_KEYS};
pub use granule::{check_granule_file, find_granules, granule_timestamp, GranuleReader, InMemoryGranuleReader};
pub use table::{Cell, MatchupTables, Table};
pub use validation::{CsvValidationSource, ValidationSource, VariableSelector};

#[cfg(feature = "gdal")]
pub use gdal_reader::GdalGranuleReader;
