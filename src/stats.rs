//! Numeric helpers shared by the feature derivation and reporting code. Missing observations are
//! excluded, never imputed.

/// Pearson correlation over the pairwise-complete subset of two series.
///
/// None when fewer than two valid pairs remain, or when either side of the paired subset has zero
/// variance.
pub fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys.iter())
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some((*x, *y)),
            _ => None,
        })
        .collect();

    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut covariance = 0f64;
    let mut variance_x = 0f64;
    let mut variance_y = 0f64;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        variance_x += dx * dx;
        variance_y += dy * dy;
    }

    if variance_x == 0.0 || variance_y == 0.0 {
        None
    } else {
        Some(covariance / (variance_x.sqrt() * variance_y.sqrt()))
    }
}

/// Mean of the non-null values in a window, or None when fewer than `min_periods` of them exist.
pub fn windowed_mean(window: &[Option<f64>], min_periods: usize) -> Option<f64> {
    let values: Vec<f64> = window.iter().filter_map(|v| *v).collect();
    if values.len() < min_periods {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n - 1 denominator). None below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_squared = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
    Some((sum_squared / (n - 1.0)).sqrt())
}
