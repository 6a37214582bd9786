//! Windowed pixel statistics around a matched site
//!
//! A `(2h+1) x (2h+1)` window is cut around the matched pixel, clipped at the
//! grid edges, passed through the [`QualityFilter`] and reduced with NaN-aware
//! mean and population standard deviation.

use crate::config::RuleSet;
use crate::core::quality_filter::{FilterOutcome, GridFields, QualityFilter};
use crate::core::statistics::{count_valid, nan_mean, nan_std};
use crate::types::{
    AggregatedPixelRecord, Field, FieldData, FieldValues, GeoMatch, PixelIndex, Skipped, Stage,
    SwathGranule,
};
use ndarray::{s, Axis};
use std::ops::Range;

/// Mean and standard deviation records for one match
#[derive(Debug, Clone)]
pub struct PixelAggregate {
    pub mean: AggregatedPixelRecord,
    pub std: AggregatedPixelRecord,
    /// Wavelengths of the granule band axis, carried for later reference
    pub wavelengths: Vec<f64>,
    /// Pixels in the clipped window
    pub window_pixels: usize,
    /// Pixels that passed every quality rule
    pub valid_pixels: usize,
    /// Fields that could not be windowed
    pub skipped: Vec<Skipped>,
}

impl PixelAggregate {
    pub fn site(&self) -> &str {
        &self.mean.geo.site
    }
}

/// Clipped window ranges `(rows, cols)` of half-width `half_width` around `center`
pub fn window_bounds(center: PixelIndex, half_width: usize, dim: (usize, usize)) -> (Range<usize>, Range<usize>) {
    let rows = center.row.saturating_sub(half_width)..(center.row + half_width + 1).min(dim.0);
    let cols = center.col.saturating_sub(half_width)..(center.col + half_width + 1).min(dim.1);
    (rows, cols)
}

pub struct WindowAggregator {
    reference_field: String,
}

impl WindowAggregator {
    /// `reference_field` is the field whose valid-pixel count is reported as `count`
    pub fn new(reference_field: impl Into<String>) -> Self {
        Self {
            reference_field: reference_field.into(),
        }
    }

    pub fn reference_field(&self) -> &str {
        &self.reference_field
    }

    /// Cut the window out of every field of `granule`. Fields whose grid does
    /// not match the geolocation grid are reported and left out.
    pub fn extract_window(
        granule: &SwathGranule,
        center: PixelIndex,
        half_width: usize,
    ) -> (GridFields, Vec<Skipped>) {
        let dim = granule.dim();
        let (rows, cols) = window_bounds(center, half_width, dim);
        let window_dim = (rows.len(), cols.len());

        let mut fields = Vec::with_capacity(granule.fields.len());
        let mut skipped = Vec::new();

        for field in &granule.fields {
            let data = match &field.data {
                FieldData::Scalar(v) => Some(FieldData::Scalar(*v)),
                FieldData::Grid(grid) if grid.dim() == dim => Some(FieldData::Grid(
                    grid.slice(s![rows.clone(), cols.clone()]).to_owned(),
                )),
                FieldData::Banded(cube) if field.data.grid_dim() == Some(dim) => Some(FieldData::Banded(
                    cube.slice(s![rows.clone(), cols.clone(), ..]).to_owned(),
                )),
                FieldData::Other(array) => {
                    log::debug!(
                        "Leaving {}-D field {} of granule {} out of the window",
                        array.ndim(),
                        field.name,
                        granule.id
                    );
                    None
                }
                other => {
                    let reason = format!(
                        "grid {:?} does not match geolocation grid {:?}",
                        other.grid_dim(),
                        dim
                    );
                    log::warn!("Skipping field {} in granule {}: {}", field.name, granule.id, reason);
                    skipped.push(Skipped::new(
                        format!("{}/{}", granule.id, field.name),
                        Stage::Aggregate,
                        reason,
                    ));
                    None
                }
            };
            if let Some(data) = data {
                fields.push(Field::new(field.name.clone(), data));
            }
        }

        (GridFields::new(window_dim, fields), skipped)
    }

    /// Aggregate the filtered window around `geo.pixel`.
    ///
    /// Always yields a record pair; a window with no valid pixels produces NaN
    /// statistics and a zero `count`.
    pub fn aggregate(
        &self,
        granule: &SwathGranule,
        geo: &GeoMatch,
        half_width: usize,
        rules: &RuleSet,
    ) -> PixelAggregate {
        let (window, skipped) = Self::extract_window(granule, geo.pixel, half_width);
        let window_pixels = window.pixel_count();
        let outcome = QualityFilter::apply(&window, rules);
        let outcome_valid = outcome.valid_pixels();
        let FilterOutcome { data, .. } = outcome;

        let mut mean = FieldValues::new();
        let mut std = FieldValues::new();

        for field in &data.fields {
            let is_reference = field.name == self.reference_field;
            match &field.data {
                FieldData::Scalar(v) => {
                    let (m, s) = if outcome_valid > 0 && !v.is_nan() {
                        (*v, 0.0)
                    } else {
                        (f64::NAN, f64::NAN)
                    };
                    mean.insert(field.name.clone(), m);
                    std.insert(field.name.clone(), s);
                    if is_reference {
                        let count = if m.is_nan() { 0.0 } else { outcome_valid as f64 };
                        mean.insert("count", count);
                        std.insert("count", count);
                    }
                }
                FieldData::Grid(grid) => {
                    mean.insert(field.name.clone(), nan_mean(grid.iter()));
                    std.insert(field.name.clone(), nan_std(grid.iter()));
                    if is_reference {
                        let count = count_valid(grid.iter()) as f64;
                        mean.insert("count", count);
                        std.insert("count", count);
                    }
                }
                FieldData::Banded(cube) => {
                    let bands = cube.dim().2;
                    if bands > 0 && bands == granule.wavelengths.len() {
                        for (band, wavelength) in granule.wavelengths.iter().enumerate() {
                            let plane = cube.index_axis(Axis(2), band);
                            let suffix = format!("wv{}", wavelength.round() as i64);
                            let name = format!("{}_{}", field.name, suffix);
                            mean.insert(name.clone(), nan_mean(plane.iter()));
                            std.insert(name, nan_std(plane.iter()));
                            if is_reference {
                                let count = count_valid(plane.iter()) as f64;
                                mean.insert(format!("count_{}", suffix), count);
                                std.insert(format!("count_{}", suffix), count);
                            }
                        }
                    } else {
                        mean.insert(field.name.clone(), nan_mean(cube.iter()));
                        std.insert(field.name.clone(), nan_std(cube.iter()));
                        if is_reference {
                            let count = count_valid(cube.iter()) as f64;
                            mean.insert("count", count);
                            std.insert("count", count);
                        }
                    }
                }
                // Left out by extract_window
                FieldData::Other(_) => {}
            }
        }

        log::debug!(
            "Aggregated {} fields for site {} in granule {} ({}/{} valid pixels)",
            mean.len(),
            geo.site,
            granule.id,
            outcome_valid,
            window_pixels
        );

        PixelAggregate {
            mean: AggregatedPixelRecord {
                geo: geo.clone(),
                values: mean,
            },
            std: AggregatedPixelRecord {
                geo: geo.clone(),
                values: std,
            },
            wavelengths: granule.wavelengths.clone(),
            window_pixels,
            valid_pixels: outcome_valid,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::{Array2, Array3, ArrayD, IxDyn};

    fn granule() -> SwathGranule {
        let lon = Array2::from_shape_fn((5, 5), |(_, c)| c as f64 * 0.01);
        let lat = Array2::from_shape_fn((5, 5), |(r, _)| r as f64 * 0.01);
        let chi2 = Array2::from_elem((5, 5), 1.0);
        let aot = Array3::from_shape_fn((5, 5, 2), |(r, c, b)| (r + c) as f64 + b as f64 * 10.0);
        SwathGranule {
            id: "20240302T140000".to_string(),
            time: NaiveDate::from_ymd_opt(2024, 3, 2)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap(),
            longitude: lon,
            latitude: lat,
            fields: vec![
                Field::grid("chi2", chi2),
                Field::banded("aot", aot),
                Field::scalar("ozone", 300.0),
            ],
            wavelengths: vec![440.4, 550.0],
        }
    }

    fn geo_at(granule: &SwathGranule, row: usize, col: usize) -> GeoMatch {
        let location = GeoPoint::new(granule.longitude[[row, col]], granule.latitude[[row, col]]);
        GeoMatch {
            site_index: 0,
            site: "site".to_string(),
            granule_id: granule.id.clone(),
            granule_time: granule.time,
            pixel: PixelIndex { row, col },
            distance_kdtree_km: 0.0,
            distance_haversine_km: 0.0,
            distance_euclidean_km: 0.0,
            site_location: location,
            pixel_location: location,
        }
    }

    #[test]
    fn test_window_bounds_clip_at_edges() {
        let (rows, cols) = window_bounds(PixelIndex { row: 0, col: 0 }, 1, (5, 5));
        assert_eq!((rows, cols), (0..2, 0..2));
        let (rows, cols) = window_bounds(PixelIndex { row: 4, col: 2 }, 2, (5, 5));
        assert_eq!((rows, cols), (2..5, 0..5));
    }

    #[test]
    fn test_corner_window_counts_four_pixels() {
        let granule = granule();
        let geo = geo_at(&granule, 0, 0);
        let aggregator = WindowAggregator::new("chi2");

        let result = aggregator.aggregate(&granule, &geo, 1, &RuleSet::new().with_range("chi2", 0.0, 2.0));
        assert_eq!(result.window_pixels, 4);
        assert_eq!(result.valid_pixels, 4);
        assert_eq!(result.mean.values.get("count"), Some(4.0));
        assert_eq!(result.std.values.get("count"), Some(4.0));
        assert_relative_eq!(result.mean.values.get("chi2").unwrap(), 1.0);
        assert_relative_eq!(result.std.values.get("chi2").unwrap(), 0.0);

        // aot band 0 in the window is [[0, 1], [1, 2]]
        assert_relative_eq!(result.mean.values.get("aot_wv440").unwrap(), 1.0);
        assert_relative_eq!(result.std.values.get("aot_wv440").unwrap(), 0.5_f64.sqrt());
        assert_relative_eq!(result.mean.values.get("aot_wv550").unwrap(), 11.0);
        assert_eq!(result.mean.values.get("ozone"), Some(300.0));
        assert_eq!(result.std.values.get("ozone"), Some(0.0));
    }

    #[test]
    fn test_fully_filtered_window_yields_nan() {
        let granule = granule();
        let geo = geo_at(&granule, 2, 2);
        let aggregator = WindowAggregator::new("chi2");
        let rules = RuleSet::new().with_range("chi2", 5.0, 6.0);

        let result = aggregator.aggregate(&granule, &geo, 1, &rules);
        assert_eq!(result.window_pixels, 9);
        assert_eq!(result.valid_pixels, 0);
        assert!(result.mean.values.get("chi2").unwrap().is_nan());
        assert!(result.mean.values.get("aot_wv550").unwrap().is_nan());
        assert!(result.std.values.get("aot_wv550").unwrap().is_nan());
        assert!(result.mean.values.get("ozone").unwrap().is_nan());
        assert_eq!(result.mean.values.get("count"), Some(0.0));
    }

    #[test]
    fn test_reference_field_per_band_counts() {
        let mut granule = granule();
        let mut chi2 = Array3::from_elem((5, 5, 2), 1.0);
        chi2[[2, 2, 1]] = f64::NAN;
        granule.fields = vec![Field::banded("chi2", chi2)];

        let geo = geo_at(&granule, 2, 2);
        let result = WindowAggregator::new("chi2").aggregate(&granule, &geo, 1, &RuleSet::new());
        assert_eq!(result.mean.values.get("count_wv440"), Some(9.0));
        assert_eq!(result.mean.values.get("count_wv550"), Some(8.0));
        assert_eq!(result.std.values.get("count_wv550"), Some(8.0));
        assert!(!result.mean.values.contains("count"));
    }

    #[test]
    fn test_non_wavelength_band_axis_reduced_whole() {
        let mut granule = granule();
        granule.fields.push(Field::banded("angles", Array3::from_elem((5, 5, 3), 2.0)));

        let geo = geo_at(&granule, 2, 2);
        let result = WindowAggregator::new("chi2").aggregate(&granule, &geo, 0, &RuleSet::new());
        assert_eq!(result.mean.values.get("angles"), Some(2.0));
        assert_eq!(result.window_pixels, 1);
    }

    #[test]
    fn test_mismatched_field_is_skipped() {
        let mut granule = granule();
        granule.fields.push(Field::grid("broken", Array2::zeros((3, 3))));

        let geo = geo_at(&granule, 2, 2);
        let result = WindowAggregator::new("chi2").aggregate(&granule, &geo, 1, &RuleSet::new());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].stage, Stage::Aggregate);
        assert!(!result.mean.values.contains("broken"));
        assert!(result.mean.values.contains("chi2"));
    }

    #[test]
    fn test_high_rank_fields_left_out_of_window() {
        let mut granule = granule();
        granule.fields.push(Field::new(
            "profile",
            FieldData::Other(ArrayD::zeros(IxDyn(&[5, 5, 2, 4]))),
        ));

        let (window, skipped) = WindowAggregator::extract_window(&granule, PixelIndex { row: 2, col: 2 }, 1);
        assert!(window.field("profile").is_none());
        assert!(window.field("chi2").is_some());
        assert!(skipped.is_empty());

        let geo = geo_at(&granule, 2, 2);
        let result = WindowAggregator::new("chi2").aggregate(&granule, &geo, 1, &RuleSet::new());
        assert!(!result.mean.values.contains("profile"));
        assert!(result.skipped.is_empty());
    }
}
