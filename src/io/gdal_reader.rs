use crate::io::granule::{granule_timestamp, GranuleReader};
use crate::types::{Field, FieldData, MatchupError, MatchupResult, SwathGranule};
use gdal::cpl::CslStringList;
use gdal::mdarray::{Group, MDArray};
use gdal::{Dataset, DatasetOptions, GdalOpenFlags};
use ndarray::{Array2, Array3, ArrayD, IxDyn};
use std::path::Path;

const LONGITUDE: &str = "longitude";
const LATITUDE: &str = "latitude";
const WAVELENGTH: &str = "wavelength";

/// NetCDF/HDF5 granule reader built on the GDAL multidimensional API
///
/// Variables are collected from every group of the file by their leaf name.
/// `_FillValue` becomes NaN and `scale_factor`/`add_offset` are applied.
#[derive(Debug, Clone, Default)]
pub struct GdalGranuleReader {
    variables: Option<Vec<String>>,
}

impl GdalGranuleReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only read these variables (geolocation and wavelength are always read)
    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = Some(variables);
        self
    }

    fn wanted(&self, name: &str) -> bool {
        matches!(name, LONGITUDE | LATITUDE | WAVELENGTH)
            || self
                .variables
                .as_ref()
                .map_or(true, |vars| vars.iter().any(|v| v == name))
    }

    fn read_group(&self, group: &Group, out: &mut Vec<(String, Vec<usize>, Vec<f64>)>) -> MatchupResult<()> {
        for name in group.array_names(CslStringList::new()) {
            if !self.wanted(&name) {
                continue;
            }
            let array = group.open_md_array(&name, CslStringList::new())?;
            let (shape, values) = read_array(&array)?;
            log::debug!("Read variable {} with shape {:?}", name, shape);
            out.push((name, shape, values));
        }
        for name in group.group_names(CslStringList::new()) {
            let child = group.open_group(&name, CslStringList::new())?;
            self.read_group(&child, out)?;
        }
        Ok(())
    }
}

fn attribute_value(array: &MDArray, name: &str) -> Option<f64> {
    array
        .attribute(name)
        .ok()
        .and_then(|attr| attr.read_as_f64_array().first().copied())
}

/// Physical values and shape of one array
fn read_array(array: &MDArray) -> MatchupResult<(Vec<usize>, Vec<f64>)> {
    let shape: Vec<usize> = array.dimensions()?.iter().map(|d| d.size()).collect();
    let start = vec![0u64; shape.len()];
    let mut values = array.read_as::<f64>(start, shape.clone())?;

    let fill = attribute_value(array, "_FillValue");
    let scale = attribute_value(array, "scale_factor").unwrap_or(1.0);
    let offset = attribute_value(array, "add_offset").unwrap_or(0.0);
    for v in values.iter_mut() {
        if fill == Some(*v) {
            *v = f64::NAN;
        } else {
            *v = *v * scale + offset;
        }
    }
    Ok((shape, values))
}

fn shape_error(name: &str, e: ndarray::ShapeError) -> MatchupError {
    MatchupError::InvalidFormat(format!("Variable {} has inconsistent shape: {}", name, e))
}

impl GranuleReader for GdalGranuleReader {
    fn open(&self, path: &Path) -> MatchupResult<SwathGranule> {
        log::info!("Opening granule: {}", path.display());
        let (id, time) = granule_timestamp(path)?;

        let dataset = Dataset::open_ex(
            path,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_MULTIDIM_RASTER,
                ..Default::default()
            },
        )?;
        let root = dataset.root_group()?;
        let mut variables = Vec::new();
        self.read_group(&root, &mut variables)?;

        let mut longitude = None;
        let mut latitude = None;
        let mut wavelengths = Vec::new();
        let mut fields = Vec::new();

        for (name, shape, values) in variables {
            match (name.as_str(), shape.as_slice()) {
                (LONGITUDE, &[rows, cols]) => {
                    longitude = Some(Array2::from_shape_vec((rows, cols), values).map_err(|e| shape_error(&name, e))?)
                }
                (LATITUDE, &[rows, cols]) => {
                    latitude = Some(Array2::from_shape_vec((rows, cols), values).map_err(|e| shape_error(&name, e))?)
                }
                (WAVELENGTH, &[_]) => wavelengths = values,
                (_, &[]) => fields.push(Field::scalar(name, values.first().copied().unwrap_or(f64::NAN))),
                (_, &[_]) => log::debug!("Skipping 1-D variable {}", name),
                (_, &[rows, cols]) => {
                    let grid = Array2::from_shape_vec((rows, cols), values).map_err(|e| shape_error(&name, e))?;
                    fields.push(Field::grid(name, grid));
                }
                (_, &[rows, cols, bands]) => {
                    let cube = Array3::from_shape_vec((rows, cols, bands), values).map_err(|e| shape_error(&name, e))?;
                    fields.push(Field::banded(name, cube));
                }
                (_, dims) => {
                    let array = ArrayD::from_shape_vec(IxDyn(dims), values).map_err(|e| shape_error(&name, e))?;
                    fields.push(Field::new(name, FieldData::Other(array)));
                }
            }
        }

        let missing = |var: &str| MatchupError::MissingColumn {
            column: var.to_string(),
            path: path.display().to_string(),
        };
        let longitude = longitude.ok_or_else(|| missing(LONGITUDE))?;
        let latitude = latitude.ok_or_else(|| missing(LATITUDE))?;
        if longitude.dim() != latitude.dim() {
            return Err(MatchupError::InvalidFormat(format!(
                "Longitude {:?} and latitude {:?} grids differ in {}",
                longitude.dim(),
                latitude.dim(),
                path.display()
            )));
        }

        log::debug!(
            "Granule {}: grid {:?}, {} fields, {} wavelengths",
            id,
            longitude.dim(),
            fields.len(),
            wavelengths.len()
        );

        Ok(SwathGranule {
            id,
            time,
            longitude,
            latitude,
            fields,
            wavelengths,
        })
    }
}
