//! Numeric series utilities shared by the models and the fitting path
//!
//! Telemetry columns arrive with gaps (sampling hiccups, fields the device
//! firmware sometimes omits). The fitting and integration code wants dense
//! `f64` slices, so everything funnels through [`fill_gaps`]. The
//! interpolation helpers align the separately-clocked power-counter trace to
//! the sampling instants with edge hold, the same policy as the lookup-table
//! clamping used elsewhere in the pack: out-of-range queries take the nearest
//! endpoint rather than extrapolating.

/// Median of the finite values in a slice, `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        Some(v[mid])
    } else {
        Some(0.5 * (v[mid - 1] + v[mid]))
    }
}

/// Mean over finite values of an iterator, `None` when there are none.
pub fn mean_finite<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        if v.is_finite() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Sample standard deviation (ddof = 1) over finite values.
pub fn std_finite(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let ss: f64 = finite.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (finite.len() - 1) as f64).sqrt())
}

/// Forward-fill then backward-fill a gappy column, falling back to the
/// in-column median and finally to `fallback` when nothing is observed.
///
/// Non-finite observations count as missing.
pub fn fill_gaps(values: &[Option<f64>], fallback: f64) -> Vec<f64> {
    let observed: Vec<f64> = values
        .iter()
        .filter_map(|v| *v)
        .filter(|v| v.is_finite())
        .collect();
    let default = median(&observed).unwrap_or(fallback);

    let mut out = Vec::with_capacity(values.len());
    let mut last: Option<f64> = None;
    for v in values {
        match v {
            Some(x) if x.is_finite() => {
                last = Some(*x);
                out.push(*x);
            }
            _ => out.push(last.unwrap_or(f64::NAN)),
        }
    }

    // Backward pass for a leading gap, then the median default.
    let mut next: Option<f64> = None;
    for v in out.iter_mut().rev() {
        if v.is_finite() {
            next = Some(*v);
        } else {
            *v = next.unwrap_or(default);
        }
    }
    out
}

/// Linear interpolation of `(x, y)` at a single query point with edge hold.
///
/// `x` must be ascending. Fewer than two points yields NaN.
pub fn interp_point(x: &[f64], y: &[f64], xq: f64) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    if x.len() < 2 {
        return f64::NAN;
    }
    if xq <= x[0] {
        return y[0];
    }
    if xq >= x[x.len() - 1] {
        return y[y.len() - 1];
    }
    // Binary search for the bracketing segment.
    let mut lo = 0usize;
    let mut hi = x.len() - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if x[mid] <= xq {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let span = x[hi] - x[lo];
    if span <= 0.0 {
        return y[lo];
    }
    let frac = (xq - x[lo]) / span;
    y[lo] + frac * (y[hi] - y[lo])
}

/// Interpolate a whole query grid. See [`interp_point`].
pub fn interp_series(x: &[f64], y: &[f64], xq: &[f64]) -> Vec<f64> {
    xq.iter().map(|&q| interp_point(x, y, q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn fill_forward_then_backward() {
        let col = vec![None, Some(2.0), None, Some(4.0), None];
        assert_eq!(fill_gaps(&col, 0.0), vec![2.0, 2.0, 2.0, 4.0, 4.0]);
    }

    #[test]
    fn fill_all_missing_uses_fallback() {
        let col = vec![None, None];
        assert_eq!(fill_gaps(&col, 3.85), vec![3.85, 3.85]);
    }

    #[test]
    fn fill_treats_nan_as_missing() {
        let col = vec![Some(f64::NAN), Some(1.0)];
        assert_eq!(fill_gaps(&col, 0.0), vec![1.0, 1.0]);
    }

    #[test]
    fn interp_holds_edges() {
        let x = [0.0, 10.0, 20.0];
        let y = [1.0, 2.0, 4.0];
        assert_eq!(interp_point(&x, &y, -5.0), 1.0);
        assert_eq!(interp_point(&x, &y, 25.0), 4.0);
        assert_eq!(interp_point(&x, &y, 5.0), 1.5);
        assert_eq!(interp_point(&x, &y, 15.0), 3.0);
    }

    #[test]
    fn interp_degenerate_inputs() {
        assert!(interp_point(&[0.0], &[1.0], 0.5).is_nan());
        let out = interp_series(&[0.0, 1.0], &[0.0, 2.0], &[0.25, 0.75]);
        assert_eq!(out, vec![0.5, 1.5]);
    }

    #[test]
    fn std_needs_two_points() {
        assert_eq!(std_finite(&[1.0]), None);
        let s = std_finite(&[1.0, 3.0]).unwrap();
        assert!((s - core::f64::consts::SQRT_2).abs() < 1e-12);
    }
}
