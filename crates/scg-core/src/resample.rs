//! Time-domain resampling of irregularly-timed accelerometer samples onto a
//! uniform 100 Hz grid. Closed-form linear interpolation, with linear
//! extrapolation from the nearest segment for query points outside the raw
//! timestamp range.

use crate::sample::Sample;

/// Grid step in milliseconds (100 Hz).
pub const STEP_MS: f64 = 10.0;

/// Resample the vertical-axis signal onto a uniform grid.
///
/// Returns `(values, timestamps)` where the timestamps are re-based to
/// absolute time (`grid + first sample's t`). Fewer than two samples, or a
/// non-positive span between first and last timestamp, yield empty output.
pub fn resample(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    if samples.len() < 2 {
        return (Vec::new(), Vec::new());
    }

    let start = samples[0].t;
    let duration = samples[samples.len() - 1].t - start;
    if duration <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    let xs: Vec<f64> = samples.iter().map(|s| s.t - start).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.az).collect();

    let mut values = Vec::new();
    let mut timestamps = Vec::new();
    let mut i = 0usize;
    loop {
        let q = i as f64 * STEP_MS;
        if q >= duration {
            break;
        }
        values.push(lerp(&xs, &ys, q));
        timestamps.push(q + start);
        i += 1;
    }

    (values, timestamps)
}

/// Piecewise-linear evaluation of `(xs, ys)` at `q`. Outside the x range the
/// nearest segment's slope extends linearly. `xs` must be sorted ascending.
fn lerp(xs: &[f64], ys: &[f64], q: f64) -> f64 {
    let n = xs.len();
    let j = match xs.partition_point(|&x| x <= q) {
        0 => 0,
        p => (p - 1).min(n - 2),
    };

    let (x0, x1) = (xs[j], xs[j + 1]);
    let (y0, y1) = (ys[j], ys[j + 1]);
    if x1 - x0 <= 0.0 {
        // Duplicate timestamps inside the batch; hold the left value.
        return y0;
    }
    y0 + (y1 - y0) * (q - x0) / (x1 - x0)
}
