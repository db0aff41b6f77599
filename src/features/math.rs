/// Infinitesimal used to keep `ln` and the z-score denominator finite.
/// Negligible next to any real price or return dispersion.
pub const PLANCK_EPSILON: f64 = 6.62607015e-34;

/// Substitute base price when a slope series starts at zero
const SLOPE_ZERO_BASE: f64 = 1e-9;

/// Calculate log returns of consecutive closes
///
/// N+1 closes produce N returns. Fewer than two closes produce none.
pub fn calculate_log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| (w[1] + PLANCK_EPSILON).ln() - (w[0] + PLANCK_EPSILON).ln())
        .collect()
}

/// Calculate the z-score of every element (population standard deviation)
///
/// A flat series maps to all zeros.
pub fn calculate_z_score(data: &[f64]) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }

    // Summation error would otherwise leave tiny nonzero residuals
    if data.iter().all(|&v| v == data[0]) {
        return vec![0.0; data.len()];
    }

    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    data.iter()
        .map(|v| (v - mean) / (std + PLANCK_EPSILON))
        .collect()
}

/// Least-squares slope of prices normalized to the first price
///
/// Equivalent to a degree-1 polyfit of `(p[i] - p[0]) / p[0]` against `i`.
pub fn calculate_slope(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }

    let base = if prices[0] == 0.0 {
        SLOPE_ZERO_BASE
    } else {
        prices[0]
    };

    let n = prices.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);

    for (i, price) in prices.iter().enumerate() {
        let x = i as f64;
        let y = (price - prices[0]) / base;

        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = n * sum_x2 - sum_x * sum_x;

    if denominator == 0.0 {
        return 0.0;
    }

    numerator / denominator
}
