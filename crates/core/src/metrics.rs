use std::collections::VecDeque;

/// Fixed-window rolling average of timing samples (milliseconds).
#[derive(Debug, Clone)]
pub struct RollingAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
    total: u64,
}

impl RollingAverage {
    /// Create an empty average over the last `window` samples.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
            total: 0,
        }
    }

    /// Record a sample, dropping the oldest once the window is full.
    pub fn put(&mut self, value: f64) {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
        self.total += 1;
    }

    /// Mean of the samples currently in the window (0 when empty).
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    /// Largest sample in the window.
    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    /// Number of samples ever recorded.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(20)
    }
}
