//! ## Descriptive statistics
//!
//! Small, exact statistics over materialized columns. Quantiles use linear interpolation
//! between closest ranks (position `(n - 1) * q`), the convention of the dataframe tools
//! the activity logs are usually explored with, so bounds computed here match them.

/// Non-missing, non-NaN values, sorted ascending.
pub fn sorted_values(values: &[Option<f64>]) -> Vec<f64> {
    let mut out: Vec<f64> = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Quantile `q` in `[0, 1]` of an already sorted slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn median(sorted: &[f64]) -> Option<f64> {
    quantile(sorted, 0.5)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// True when every value equals the first one (including the empty slice).
pub fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample).
/// Constant input yields exactly `0.0`.
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    if is_constant(values) {
        return Some(0.0);
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / (values.len() - ddof) as f64)
}

pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    variance(values, ddof).map(f64::sqrt)
}

/// Number of distinct values of a sorted slice.
pub fn distinct_count(sorted: &[f64]) -> usize {
    let mut count = 0;
    let mut last: Option<f64> = None;
    for &v in sorted {
        if last != Some(v) {
            count += 1;
            last = Some(v);
        }
    }
    count
}

/// Pearson correlation over the rows where both values are present.
/// `None` when fewer than two such rows exist or either side is constant.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if !a.is_nan() && !b.is_nan() => Some((*a, *b)),
            _ => None,
        })
        .collect();
    if pairs.len() < 2
        || pairs.windows(2).all(|w| w[0].0 == w[1].0)
        || pairs.windows(2).all(|w| w[0].1 == w[1].1)
    {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_linear_interpolation() {
        let sorted = sorted_values(&[
            Some(1000.0),
            Some(20.0),
            Some(22.0),
            None,
            Some(21.0),
            Some(24.0),
            Some(23.0),
        ]);
        assert_eq!(sorted, vec![20.0, 21.0, 22.0, 23.0, 24.0, 1000.0]);
        assert_relative_eq!(quantile(&sorted, 0.25).unwrap(), 21.25);
        assert_relative_eq!(quantile(&sorted, 0.75).unwrap(), 23.75);
        assert_relative_eq!(median(&sorted).unwrap(), 22.5);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_variance_ddof() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(variance(&values, 0).unwrap(), 4.0);
        assert_relative_eq!(std_dev(&values, 0).unwrap(), 2.0);
        assert_relative_eq!(variance(&values, 1).unwrap(), 32.0 / 7.0);
        assert_eq!(variance(&[1.0], 1), None);
    }

    #[test]
    fn test_inexact_constant_has_zero_spread() {
        let values = [0.1; 10];
        assert!(is_constant(&values));
        assert_eq!(variance(&values, 0), Some(0.0));
        assert_eq!(std_dev(&values, 1), Some(0.0));
        let x: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).collect();
        assert_eq!(pearson(&x, &[Some(0.1); 10]), None);
    }

    #[test]
    fn test_distinct_count() {
        assert_eq!(distinct_count(&[1.0, 1.0, 2.0, 3.0, 3.0]), 3);
        assert_eq!(distinct_count(&[]), 0);
    }

    #[test]
    fn test_pearson() {
        let x = [Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let y = [Some(2.0), Some(4.0), Some(6.0), Some(8.0)];
        let z = [Some(4.0), Some(3.0), None, Some(1.0)];
        assert_relative_eq!(pearson(&x, &y).unwrap(), 1.0);
        assert!(pearson(&x, &z).unwrap() < -0.9);
        assert_eq!(pearson(&x, &[Some(5.0); 4]), None);
    }
}
