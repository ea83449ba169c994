/// Exponential moving average.
///
/// The first sample seeds the average; afterwards
/// `avg = alpha × sample + (1 − alpha) × avg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub const DEFAULT_ALPHA: f64 = 0.1;

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value: None,
        }
    }

    pub fn record(&mut self, sample: f64) {
        self.value = Some(match self.value {
            Some(avg) => self.alpha * sample + (1.0 - self.alpha) * avg,
            None => sample,
        });
    }

    /// Current average, `0.0` before any sample.
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

impl Default for Ema {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALPHA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds() {
        let mut ema = Ema::default();
        assert_eq!(ema.value(), 0.0);
        ema.record(50.0);
        assert_eq!(ema.value(), 50.0);
    }

    #[test]
    fn test_smoothing() {
        let mut ema = Ema::new(0.1);
        ema.record(100.0);
        ema.record(200.0);
        assert!((ema.value() - 110.0).abs() < 1e-9);
    }
}
