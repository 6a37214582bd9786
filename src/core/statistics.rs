//! NaN-aware reductions used by the window aggregator and the temporal matcher

/// Mean of the non-NaN values; NaN when there are none
pub fn nan_mean<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Standard deviation of the non-NaN values with `ddof` delta degrees of freedom.
/// NaN when fewer than `ddof + 1` values remain.
pub fn nan_std_ddof<'a, I>(values: I, ddof: usize) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    let valid: Vec<f64> = values.into_iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.len() <= ddof {
        return f64::NAN;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let sum_sq: f64 = valid.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (valid.len() - ddof) as f64).sqrt()
}

/// Population standard deviation, matching `numpy.nanstd`
pub fn nan_std<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    nan_std_ddof(values, 0)
}

/// Sample standard deviation (N-1), matching `pandas.Series.std`
pub fn nan_sample_std<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    nan_std_ddof(values, 1)
}

pub fn count_valid<'a, I>(values: I) -> usize
where
    I: IntoIterator<Item = &'a f64>,
{
    values.into_iter().filter(|v| !v.is_nan()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nan_mean_skips_nan() {
        let values = [1.0, f64::NAN, 3.0];
        assert_relative_eq!(nan_mean(&values), 2.0);
        assert!(nan_mean(&[f64::NAN, f64::NAN]).is_nan());
        assert!(nan_mean(&[] as &[f64]).is_nan());
    }

    #[test]
    fn test_population_and_sample_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(nan_std(&values), 2.0);
        assert_relative_eq!(nan_sample_std(&values), 2.138089935299395, epsilon = 1e-12);
    }

    #[test]
    fn test_single_value_std() {
        assert_relative_eq!(nan_std(&[3.0, f64::NAN]), 0.0);
        assert!(nan_sample_std(&[3.0, f64::NAN]).is_nan());
        assert_eq!(count_valid(&[3.0, f64::NAN]), 1);
    }
}
