//! Spectral interpolation of validation measurements onto satellite wavelengths

use crate::types::MISSING_SENTINEL;
use ndarray::Array2;

/// Minimum number of valid points for a cubic spline fit
pub const MIN_SPLINE_POINTS: usize = 4;

/// Interpolating cubic spline with not-a-knot end conditions
///
/// The third derivative is continuous across the second and the penultimate
/// knot, so four knots give the single cubic through them.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at each knot
    m: Vec<f64>,
}

impl CubicSpline {
    /// Fit through strictly increasing `x`. Returns `None` for fewer than
    /// [`MIN_SPLINE_POINTS`] knots or unordered input.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < MIN_SPLINE_POINTS || y.len() != n || x.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut a = Array2::<f64>::zeros((n, n));
        let mut rhs = vec![0.0; n];

        a[[0, 0]] = -h[1];
        a[[0, 1]] = h[0] + h[1];
        a[[0, 2]] = -h[0];
        for i in 1..n - 1 {
            a[[i, i - 1]] = h[i - 1];
            a[[i, i]] = 2.0 * (h[i - 1] + h[i]);
            a[[i, i + 1]] = h[i];
            rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        }
        a[[n - 1, n - 3]] = -h[n - 2];
        a[[n - 1, n - 2]] = h[n - 3] + h[n - 2];
        a[[n - 1, n - 1]] = -h[n - 3];

        let m = solve_dense(a, rhs)?;
        Some(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Evaluate at `t`; outside the knot range the end polynomials are extended
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        let i = match self.x.partition_point(|&xi| xi <= t) {
            0 => 0,
            p => (p - 1).min(n - 2),
        };

        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let (y0, y1) = (self.y[i], self.y[i + 1]);
        let (m0, m1) = (self.m[i], self.m[i + 1]);
        let h = x1 - x0;
        let a = x1 - t;
        let b = t - x0;

        m0 * a.powi(3) / (6.0 * h)
            + m1 * b.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * a
            + (y1 / h - m1 * h / 6.0) * b
    }
}

/// Gaussian elimination with partial pivoting; `None` when singular
fn solve_dense(mut a: Array2<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&r, &s| a[[r, col]].abs().total_cmp(&a[[s, col]].abs()))?;
        if a[[pivot, col]].abs() < f64::EPSILON {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

/// Polynomial through all (two or three) points, Lagrange form
fn lagrange(x: &[f64], y: &[f64], t: f64) -> f64 {
    (0..x.len())
        .map(|i| {
            let basis: f64 = (0..x.len())
                .filter(|&j| j != i)
                .map(|j| (t - x[j]) / (x[i] - x[j]))
                .product();
            y[i] * basis
        })
        .sum()
}

/// Interpolate one spectrum onto `targets`.
///
/// NaN and `-999` values are excluded. With at least [`MIN_SPLINE_POINTS`]
/// valid points a not-a-knot cubic spline is used, three points give the
/// quadratic through them and two a straight line. Otherwise every target is NaN.
pub fn interpolate_spectrum(wavelengths: &[f64], values: &[f64], targets: &[f64]) -> Vec<f64> {
    let mut points: Vec<(f64, f64)> = wavelengths
        .iter()
        .zip(values.iter())
        .filter(|(wl, v)| wl.is_finite() && v.is_finite() && **v != MISSING_SENTINEL)
        .map(|(&wl, &v)| (wl, v))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|later, earlier| later.0 == earlier.0);

    let (x, y): (Vec<f64>, Vec<f64>) = points.into_iter().unzip();

    if x.len() >= MIN_SPLINE_POINTS {
        if let Some(spline) = CubicSpline::fit(&x, &y) {
            return targets.iter().map(|&t| spline.eval(t)).collect();
        }
    }
    if x.len() >= 2 {
        let tail = x.len().min(3);
        return targets
            .iter()
            .map(|&t| lagrange(&x[..tail], &y[..tail], t))
            .collect();
    }
    vec![f64::NAN; targets.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spline_reproduces_linear_spectrum() {
        let wl = [870.0, 440.0, 675.0, 500.0];
        let aod: Vec<f64> = wl.iter().map(|w| 1.2 - w / 1000.0).collect();

        let out = interpolate_spectrum(&wl, &aod, &[550.0, 1020.0]);
        assert_relative_eq!(out[0], 0.65, epsilon = 1e-12);
        assert_relative_eq!(out[1], 0.18, epsilon = 1e-12);
    }

    #[test]
    fn test_spline_passes_through_knots() {
        let x = [400.0, 500.0, 600.0, 700.0, 800.0];
        let y = [0.9, 0.5, 0.4, 0.35, 0.1];
        let spline = CubicSpline::fit(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert_relative_eq!(spline.eval(*xi), *yi, epsilon = 1e-12);
        }
        let mid = spline.eval(550.0);
        assert!(mid > 0.35 && mid < 0.5);
    }

    #[test]
    fn test_missing_values_fall_back_to_linear() {
        let wl = [440.0, 500.0, 675.0, 870.0];
        let aod = [0.4, MISSING_SENTINEL, f64::NAN, 0.2];

        let out = interpolate_spectrum(&wl, &aod, &[655.0]);
        assert_relative_eq!(out[0], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_single_point_gives_nan() {
        let out = interpolate_spectrum(&[440.0, 500.0], &[0.4, MISSING_SENTINEL], &[550.0, 600.0]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    fn cubic(w: f64) -> f64 {
        let d = w - 600.0;
        0.1 + 2e-9 * d.powi(3) - 1e-6 * d.powi(2) + 1e-4 * d
    }

    #[test]
    fn test_spline_reproduces_cubic_spectrum() {
        for wl in [vec![440.0, 500.0, 675.0, 870.0], vec![440.0, 500.0, 675.0, 870.0, 1020.0]] {
            let aod: Vec<f64> = wl.iter().map(|&w| cubic(w)).collect();
            let out = interpolate_spectrum(&wl, &aod, &[550.0, 400.0, 1100.0]);
            assert_relative_eq!(out[0], cubic(550.0), epsilon = 1e-12);
            assert_relative_eq!(out[1], cubic(400.0), epsilon = 1e-12);
            assert_relative_eq!(out[2], cubic(1100.0), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_three_points_fit_quadratic() {
        let parabola = |w: f64| 0.2 + 3e-6 * (w - 500.0).powi(2);
        let wl = [440.0, 675.0, 870.0];
        let aod: Vec<f64> = wl.iter().map(|&w| parabola(w)).collect();

        let out = interpolate_spectrum(&wl, &aod, &[550.0]);
        assert_relative_eq!(out[0], parabola(550.0), epsilon = 1e-12);
        assert_relative_eq!(out[0], 0.2075, epsilon = 1e-12);
    }

    #[test]
    fn test_too_few_knots_for_cubic_spline() {
        assert!(CubicSpline::fit(&[400.0, 500.0, 600.0], &[0.3, 0.2, 0.1]).is_none());
        assert!(CubicSpline::fit(&[400.0, 400.0, 500.0, 600.0], &[0.3, 0.2, 0.1, 0.0]).is_none());
    }
}
