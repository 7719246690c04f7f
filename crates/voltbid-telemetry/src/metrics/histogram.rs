use super::IntoF64;

/// A histogram recording observed values into configured buckets.
#[derive(Clone)]
pub struct Histogram(metrics::Histogram);

impl Histogram {
    /// Records a value in the histogram.
    pub fn record<T: IntoF64>(&self, value: T) {
        self.0.record(value.into_f64());
    }

    pub(super) fn new(histogram: metrics::Histogram) -> Self {
        Self(histogram)
    }
}
