//! Aggregation helpers used when stitching slices of different step sizes
//! together.

/// Average of the non-missing values. Missing if the input is empty or if
/// missings outnumber present values.
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sum = 0.0;
    let mut present = 0usize;
    let mut missing = 0usize;

    for v in values {
        match v {
            Some(x) => {
                sum += x;
                present += 1;
            }
            None => missing += 1,
        }
    }

    if missing > present {
        return None;
    }

    Some(sum / present as f64)
}

/// Rebucket `values` (sampled at `old_step`) into buckets of `new_step`,
/// averaging each bucket. `factor = new_step / old_step` is assumed
/// integral and `>= 1`. A trailing partial bucket of length `r` is kept
/// only when `r > factor / 4`.
pub fn downsample(values: &[Option<f64>], old_step: u32, new_step: u32) -> Vec<Option<f64>> {
    let factor = (new_step / old_step).max(1) as usize;
    if factor == 1 {
        return values.to_vec();
    }

    let mut out = Vec::with_capacity(values.len() / factor + 1);
    let mut chunks = values.chunks_exact(factor);
    for chunk in &mut chunks {
        out.push(mean(chunk));
    }
    let remainder = chunks.remainder();
    if remainder.len() > factor / 4 {
        out.push(mean(remainder));
    }
    out
}
