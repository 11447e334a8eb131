use crate::color::ConfidenceTier;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberTolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl NumberTolerance {
    pub fn new(absolute: f64, relative: f64) -> Self {
        Self { absolute, relative }
    }

    /// `candidate` is accepted when it differs from `current` by at most the
    /// absolute tolerance, or by at most the relative tolerance of `current`.
    pub fn accepts(&self, current: f64, candidate: f64) -> bool {
        let diff = (current - candidate).abs();
        if diff == 0.0 || diff <= self.absolute {
            return true;
        }
        if current == 0.0 || self.relative <= 0.0 {
            return false;
        }
        diff / current.abs() <= self.relative
    }
}

impl Default for NumberTolerance {
    fn default() -> Self {
        Self::new(1.0, 0.05)
    }
}

pub fn same_number(left: f64, right: f64) -> bool {
    left == right
}

/// Hash key for exact-value buckets. Signed zeros share a key and NaN never
/// reaches an index.
pub fn number_key(value: f64) -> Option<u64> {
    if value.is_nan() {
        return None;
    }
    let canonical = if value == 0.0 { 0.0 } else { value };
    Some(canonical.to_bits())
}

pub fn close_difference(current: f64, candidate: f64, max_diff: f64) -> Option<f64> {
    let diff = (current - candidate).abs();
    (diff <= max_diff).then_some(diff)
}

pub fn classify_number(current: f64, candidate: f64, tolerance: &NumberTolerance) -> Option<ConfidenceTier> {
    if same_number(current, candidate) {
        Some(ConfidenceTier::Exact)
    } else if (current - candidate).abs() <= tolerance.absolute {
        Some(ConfidenceTier::Close)
    } else if tolerance.accepts(current, candidate) {
        Some(ConfidenceTier::Approximate)
    } else {
        None
    }
}

/// Renders a number the way values are echoed back to callers: integers
/// without a fractional part, everything else with up to four decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let text = format!("{value:.4}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
