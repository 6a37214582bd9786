//! Nearest-pixel search of validation sites in a swath grid
//!
//! The index is planar in (lon, lat) degrees with no projection correction.
//! Selection uses that planar distance scaled by [`KM_PER_DEGREE`]; the
//! great-circle and straight-line distances on the matched coordinates are
//! reported alongside it for quality assessment.

use crate::types::{GeoMatch, GeoPoint, MatchupError, MatchupResult, PixelIndex, ValidationSite};
use chrono::NaiveDateTime;
use ndarray::ArrayView2;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Fixed degrees to kilometres factor
pub const KM_PER_DEGREE: f64 = 110.0;

/// Mean Earth radius, km
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in km
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lon1, lat1) = (a.lon.to_radians(), a.lat.to_radians());
    let (lon2, lat2) = (b.lon.to_radians(), b.lat.to_radians());

    let dlon = lon2 - lon1;
    let dlat = lat2 - lat1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Straight line in degree space converted with [`KM_PER_DEGREE`]
pub fn euclidean_km(a: GeoPoint, b: GeoPoint) -> f64 {
    ((a.lon - b.lon).powi(2) + (a.lat - b.lat).powi(2)).sqrt() * KM_PER_DEGREE
}

/// Indexed grid cell centre
#[derive(Debug, Clone)]
struct GridPoint {
    coord: [f64; 2],
    flat_index: usize,
}

impl RTreeObject for GridPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coord)
    }
}

impl PointDistance for GridPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coord[0] - point[0];
        let dy = self.coord[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Nearest grid cell of a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPixel {
    pub pixel: PixelIndex,
    /// Planar index-space distance times [`KM_PER_DEGREE`]
    pub distance_km: f64,
}

/// Nearest-neighbour index over one granule's geolocation grid
pub struct SpatialLocator<'a> {
    tree: RTree<GridPoint>,
    longitude: ArrayView2<'a, f64>,
    latitude: ArrayView2<'a, f64>,
}

impl<'a> SpatialLocator<'a> {
    /// Build the index from matching 2-D longitude/latitude grids.
    /// Cells with non-finite coordinates are left out.
    pub fn new(longitude: ArrayView2<'a, f64>, latitude: ArrayView2<'a, f64>) -> MatchupResult<Self> {
        if longitude.dim() != latitude.dim() {
            return Err(MatchupError::InvalidFormat(format!(
                "Longitude grid {:?} and latitude grid {:?} differ in shape",
                longitude.dim(),
                latitude.dim()
            )));
        }

        let points: Vec<GridPoint> = longitude
            .iter()
            .zip(latitude.iter())
            .enumerate()
            .filter(|(_, (lon, lat))| lon.is_finite() && lat.is_finite())
            .map(|(flat_index, (&lon, &lat))| GridPoint {
                coord: [lon, lat],
                flat_index,
            })
            .collect();

        log::debug!(
            "Built spatial index with {} of {} grid cells",
            points.len(),
            longitude.len()
        );

        Ok(Self {
            tree: RTree::bulk_load(points),
            longitude,
            latitude,
        })
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Single nearest cell (k = 1); ties follow the R-tree's own ordering
    pub fn nearest(&self, point: GeoPoint) -> Option<NearestPixel> {
        if !point.is_finite() {
            return None;
        }
        let query = [point.lon, point.lat];
        let nearest = self.tree.nearest_neighbor(&query)?;
        let cols = self.longitude.ncols();

        Some(NearestPixel {
            pixel: PixelIndex {
                row: nearest.flat_index / cols,
                col: nearest.flat_index % cols,
            },
            distance_km: nearest.distance_2(&query).sqrt() * KM_PER_DEGREE,
        })
    }

    /// Match every site against the grid, keeping those whose nearest cell is
    /// within `radius_km`. Output follows the order of `sites`.
    pub fn locate(
        &self,
        sites: &[ValidationSite],
        radius_km: f64,
        granule_id: &str,
        granule_time: NaiveDateTime,
    ) -> Vec<GeoMatch> {
        #[cfg(feature = "parallel")]
        let iter = sites.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = sites.iter();

        let matches: Vec<GeoMatch> = iter
            .filter_map(|site| self.match_site(site, radius_km, granule_id, granule_time))
            .collect();

        log::debug!(
            "Granule {}: {} of {} sites within {:.1} km",
            granule_id,
            matches.len(),
            sites.len(),
            radius_km
        );
        matches
    }

    fn match_site(
        &self,
        site: &ValidationSite,
        radius_km: f64,
        granule_id: &str,
        granule_time: NaiveDateTime,
    ) -> Option<GeoMatch> {
        let nearest = self.nearest(site.location)?;
        if nearest.distance_km > radius_km {
            return None;
        }

        let PixelIndex { row, col } = nearest.pixel;
        let pixel_location = GeoPoint::new(self.longitude[[row, col]], self.latitude[[row, col]]);

        Some(GeoMatch {
            site_index: site.index,
            site: site.name.clone(),
            granule_id: granule_id.to_string(),
            granule_time,
            pixel: nearest.pixel,
            distance_kdtree_km: nearest.distance_km,
            distance_haversine_km: haversine_km(site.location, pixel_location),
            distance_euclidean_km: euclidean_km(site.location, pixel_location),
            site_location: site.location,
            pixel_location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn granule_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 2)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    /// 0.05 degree grid with pixel (120, 300) at (-156.92, 20.68)
    fn hawaii_grid() -> (Array2<f64>, Array2<f64>) {
        let lon = Array2::from_shape_fn((200, 400), |(_, c)| -156.92 + (c as f64 - 300.0) * 0.05);
        let lat = Array2::from_shape_fn((200, 400), |(r, _)| 20.68 + (r as f64 - 120.0) * 0.05);
        (lon, lat)
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude along a meridian
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert_relative_eq!(d, 111.19492664455873, epsilon = 1e-9);
        assert_relative_eq!(euclidean_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)), 110.0);
    }

    #[test]
    fn test_lanai_match() {
        let (lon, lat) = hawaii_grid();
        let locator = SpatialLocator::new(lon.view(), lat.view()).unwrap();
        let sites = vec![ValidationSite::new(0, "Lanai", -156.9, 20.7)];

        let matches = locator.locate(&sites, 5.0, "20240302T140000", granule_time());
        assert_eq!(matches.len(), 1);

        let m = &matches[0];
        assert_eq!(m.site, "Lanai");
        assert_eq!(m.pixel, PixelIndex { row: 120, col: 300 });
        assert_relative_eq!(m.pixel_location.lon, -156.92, epsilon = 1e-9);
        assert_relative_eq!(m.pixel_location.lat, 20.68, epsilon = 1e-9);
        assert!(m.distance_haversine_km > 2.9 && m.distance_haversine_km < 3.2);
        assert_relative_eq!(m.distance_kdtree_km, m.distance_euclidean_km, epsilon = 1e-9);
        assert!(m.distance_kdtree_km <= 5.0);
    }

    #[test]
    fn test_radius_invariant() {
        let (lon, lat) = hawaii_grid();
        let locator = SpatialLocator::new(lon.view(), lat.view()).unwrap();
        let sites = vec![
            ValidationSite::new(0, "near", -156.9, 20.7),
            ValidationSite::new(1, "offgrid", -140.0, 20.7),
            ValidationSite::new(2, "between", -156.895, 20.705),
        ];
        let radius = 3.0;

        let matches = locator.locate(&sites, radius, "g", granule_time());
        for site in &sites {
            let nearest = locator.nearest(site.location).unwrap();
            let accepted = matches.iter().any(|m| m.site == site.name);
            if accepted {
                assert!(nearest.distance_km <= radius);
            } else {
                assert!(nearest.distance_km > radius);
            }
        }
        assert!(matches.iter().all(|m| m.site != "offgrid"));
    }

    #[test]
    fn test_exact_pixel_centre_always_accepted() {
        let (lon, lat) = hawaii_grid();
        let locator = SpatialLocator::new(lon.view(), lat.view()).unwrap();
        let centre = ValidationSite::new(0, "centre", lon[[10, 20]], lat[[10, 20]]);

        let matches = locator.locate(&[centre], 0.0, "g", granule_time());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pixel, PixelIndex { row: 10, col: 20 });
        assert_eq!(matches[0].distance_kdtree_km, 0.0);
        assert_eq!(matches[0].distance_haversine_km, 0.0);
    }

    #[test]
    fn test_non_finite_cells_and_sites_ignored() {
        let mut lon = Array2::from_shape_fn((2, 2), |(_, c)| c as f64);
        let lat = Array2::from_shape_fn((2, 2), |(r, _)| r as f64);
        lon[[0, 0]] = f64::NAN;
        let locator = SpatialLocator::new(lon.view(), lat.view()).unwrap();
        assert_eq!(locator.len(), 3);

        let nearest = locator.nearest(GeoPoint::new(0.0, 0.0)).unwrap();
        assert_ne!(nearest.pixel, PixelIndex { row: 0, col: 0 });
        assert!(locator.nearest(GeoPoint::new(f64::NAN, 0.0)).is_none());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let lon = Array2::<f64>::zeros((2, 3));
        let lat = Array2::<f64>::zeros((3, 2));
        assert!(SpatialLocator::new(lon.view(), lat.view()).is_err());
    }
}
