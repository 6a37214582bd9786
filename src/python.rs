//! Python bindings for the matchup building blocks

use crate::config::{MatchupConfig, RuleSet};
use crate::core::quality_filter::{GridFields, QualityFilter};
use crate::core::spatial_locator::{haversine_km, SpatialLocator};
use crate::io::granule::granule_timestamp;
use crate::types::{Field, GeoPoint, ValidationSite};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

/// Great-circle distance in km between two lon/lat points
#[pyfunction]
fn haversine_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    haversine_km(GeoPoint::new(lon1, lat1), GeoPoint::new(lon2, lat2))
}

/// Nearest-pixel matches of sites in one granule grid
#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn locate_sites(
    py: Python,
    longitude: PyReadonlyArray2<f64>,
    latitude: PyReadonlyArray2<f64>,
    granule_path: String,
    names: Vec<String>,
    site_lons: Vec<f64>,
    site_lats: Vec<f64>,
    radius_km: f64,
) -> PyResult<PyObject> {
    if names.len() != site_lons.len() || names.len() != site_lats.len() {
        return Err(PyValueError::new_err("names, site_lons and site_lats must have the same length"));
    }
    let (granule_id, granule_time) =
        granule_timestamp(&granule_path).map_err(|e| PyValueError::new_err(format!("{}", e)))?;

    let sites: Vec<ValidationSite> = names
        .into_iter()
        .zip(site_lons.into_iter().zip(site_lats))
        .enumerate()
        .map(|(i, (name, (lon, lat)))| ValidationSite::new(i, name, lon, lat))
        .collect();

    let locator = SpatialLocator::new(longitude.as_array(), latitude.as_array())
        .map_err(|e| PyValueError::new_err(format!("{}", e)))?;
    let matches = locator.locate(&sites, radius_km, &granule_id, granule_time);

    let result = PyList::empty(py);
    for m in matches {
        let item = PyDict::new(py);
        item.set_item("site_index", m.site_index)?;
        item.set_item("site", m.site)?;
        item.set_item("granule", m.granule_id)?;
        item.set_item("datetime", m.granule_time.format("%Y-%m-%d %H:%M:%S").to_string())?;
        item.set_item("pixel_row", m.pixel.row)?;
        item.set_item("pixel_col", m.pixel.col)?;
        item.set_item("pixel_lon", m.pixel_location.lon)?;
        item.set_item("pixel_lat", m.pixel_location.lat)?;
        item.set_item("distance0_kdtree", m.distance_kdtree_km)?;
        item.set_item("distance1_haversine", m.distance_haversine_km)?;
        item.set_item("distance2_euclidean", m.distance_euclidean_km)?;
        result.append(item)?;
    }
    Ok(result.into())
}

/// Combined quality mask of 2-D fields under JSON rules, e.g. `{"chi2": [0, 2]}`
#[pyfunction]
fn quality_mask(py: Python, fields: &PyDict, rules_json: String) -> PyResult<PyObject> {
    let rules: RuleSet = serde_json::from_str(&rules_json)
        .map_err(|e| PyValueError::new_err(format!("Invalid rules: {}", e)))?;

    let mut dim = None;
    let mut grid_fields = Vec::with_capacity(fields.len());
    for (key, value) in fields.iter() {
        let name: String = key.extract()?;
        let array: PyReadonlyArray2<f64> = value.extract()?;
        let array = array.as_array().to_owned();
        match dim {
            None => dim = Some(array.dim()),
            Some(d) if d != array.dim() => {
                return Err(PyValueError::new_err(format!(
                    "Field {} has shape {:?}, expected {:?}",
                    name,
                    array.dim(),
                    d
                )))
            }
            Some(_) => {}
        }
        grid_fields.push(Field::grid(name, array));
    }

    let dim = dim.ok_or_else(|| PyValueError::new_err("No fields given"))?;
    let outcome = QualityFilter::apply(&GridFields::new(dim, grid_fields), &rules);
    Ok(outcome.mask.to_pyarray(py).into())
}

/// Output tag of a JSON matchup configuration
#[pyfunction]
fn rules_tag(config_json: String) -> PyResult<String> {
    let config = MatchupConfig::from_json_str(&config_json)
        .map_err(|e| PyValueError::new_err(format!("{}", e)))?;
    Ok(config.rules_tag())
}

/// Interpolate one spectrum onto target wavelengths
#[pyfunction]
fn interpolate_spectrum(wavelengths: Vec<f64>, values: Vec<f64>, targets: Vec<f64>) -> Vec<f64> {
    crate::io::spectral::interpolate_spectrum(&wavelengths, &values, &targets)
}

/// Remove duplicated rows from every CSV file below `root`
#[pyfunction]
fn remove_duplicates(root: String, key_columns: Option<Vec<String>>) -> PyResult<Vec<String>> {
    let keys: Vec<String> = key_columns.unwrap_or_else(|| {
        crate::io::dedup::AERONET_DEDUP_KEYS
            .iter()
            .map(|k| k.to_string())
            .collect()
    });
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    crate::io::dedup::remove_duplicate_rows(&root, &keys)
        .map_err(|e| PyRuntimeError::new_err(format!("Duplicate removal failed: {}", e)))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(haversine_distance, m)?)?;
    m.add_function(wrap_pyfunction!(locate_sites, m)?)?;
    m.add_function(wrap_pyfunction!(quality_mask, m)?)?;
    m.add_function(wrap_pyfunction!(rules_tag, m)?)?;
    m.add_function(wrap_pyfunction!(interpolate_spectrum, m)?)?;
    m.add_function(wrap_pyfunction!(remove_duplicates, m)?)?;
    Ok(())
}
