//! Component E: percentile-clipped CDF histogram matching.

use crate::error::{RegistrationError, Result};
use crate::volume::Volume;

/// Maps `source` intensities onto `reference`'s intensity distribution by
/// percentile-clipped CDF matching.
///
/// Degenerate inputs (no finite samples in either volume, or a collapsed
/// `[lo, hi]` range after clipping `outlier_fraction` from both tails)
/// return `source` unchanged and log a warning rather than erroring —
/// this is the one component-level operation in this crate that is
/// allowed to no-op instead of propagating a fatal error.
pub fn histogram_match(
    source: &Volume<f32>,
    reference: &Volume<f32>,
    bins: u32,
    outlier_fraction: f64,
) -> Result<Volume<f32>> {
    if !(0.0..0.5).contains(&outlier_fraction) {
        return Err(RegistrationError::InvalidParameter(format!(
            "outlier_fraction must be in [0, 0.5), got {outlier_fraction}"
        )));
    }
    if bins == 0 {
        return Err(RegistrationError::InvalidParameter(
            "histogram bins must be > 0".into(),
        ));
    }
    let bins = bins as usize;

    let src_sorted = finite_sorted(source.data());
    let ref_sorted = finite_sorted(reference.data());

    if let Err(err) = check_non_empty(&src_sorted, &ref_sorted) {
        tracing::warn!("{err}");
        return Ok(source.clone());
    }

    let (s_lo, s_hi) = percentile_range(&src_sorted, outlier_fraction);
    let (r_lo, r_hi) = percentile_range(&ref_sorted, outlier_fraction);

    if let Err(err) = check_non_degenerate_range(s_lo, s_hi, r_lo, r_hi) {
        tracing::warn!("{err}");
        return Ok(source.clone());
    }

    let src_hist = build_histogram(&src_sorted, s_lo, s_hi, bins);
    let ref_hist = build_histogram(&ref_sorted, r_lo, r_hi, bins);
    let src_cdf = cdf(&src_hist);
    let ref_cdf = cdf(&ref_hist);

    let lookup: Vec<f32> = src_cdf
        .iter()
        .map(|&q| {
            let ref_bin = ref_cdf.iter().position(|&c| c >= q).unwrap_or(bins - 1);
            r_lo + (r_hi - r_lo) * (ref_bin as f32) / (bins as f32)
        })
        .collect();

    let mut out = source.clone();
    for v in out.data_mut() {
        if !v.is_finite() {
            continue;
        }
        *v = if *v < s_lo {
            r_lo
        } else if *v > s_hi {
            r_hi
        } else {
            let bin = bin_index(*v, s_lo, s_hi, bins);
            lookup[bin]
        };
    }
    Ok(out)
}

/// Classifies "no finite samples in source or reference" as the §7
/// `DegenerateHistogram` error; the caller recovers by returning the
/// source unchanged.
fn check_non_empty(src_sorted: &[f32], ref_sorted: &[f32]) -> Result<()> {
    if src_sorted.is_empty() || ref_sorted.is_empty() {
        return Err(RegistrationError::DegenerateHistogram(
            "one or both volumes have no finite samples".into(),
        ));
    }
    Ok(())
}

/// Classifies a collapsed `[lo, hi]` range, in either volume, after
/// percentile clipping as the §7 `DegenerateHistogram` error.
fn check_non_degenerate_range(s_lo: f32, s_hi: f32, r_lo: f32, r_hi: f32) -> Result<()> {
    if s_hi <= s_lo || r_hi <= r_lo {
        return Err(RegistrationError::DegenerateHistogram(
            "degenerate intensity range after percentile clipping".into(),
        ));
    }
    Ok(())
}

fn finite_sorted(data: &[f32]) -> Vec<f32> {
    let mut values: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values
}

/// `quantile(p)` and `quantile(1-p)` of an already-sorted finite slice.
fn percentile_range(sorted: &[f32], p: f64) -> (f32, f32) {
    (quantile(sorted, p), quantile(sorted, 1.0 - p))
}

fn quantile(sorted: &[f32], p: f64) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let idx = (p * (n - 1) as f64).round() as usize;
    sorted[idx.min(n - 1)]
}

fn bin_index(value: f32, lo: f32, hi: f32, bins: usize) -> usize {
    let frac = (value - lo) / (hi - lo);
    ((frac * bins as f32) as usize).min(bins - 1)
}

fn build_histogram(sorted: &[f32], lo: f32, hi: f32, bins: usize) -> Vec<u64> {
    let mut hist = vec![0u64; bins];
    for &v in sorted {
        if v < lo || v > hi {
            continue;
        }
        hist[bin_index(v, lo, hi, bins)] += 1;
    }
    hist
}

fn cdf(hist: &[u64]) -> Vec<f32> {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return vec![0.0; hist.len()];
    }
    let mut running = 0u64;
    hist.iter()
        .map(|&count| {
            running += count;
            running as f32 / total as f32
        })
        .collect()
}
