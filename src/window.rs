// src/window.rs

//! Fixed-capacity moving average over latency samples

/// Ring buffer of samples with a running mean and standard deviation.
///
/// `add` reports `true` every time `capacity` new samples have arrived since
/// the last report. Not safe for unsynchronized concurrent use: callers
/// serialize access (the adaptive controller holds it behind a mutex).
#[derive(Debug, Clone)]
pub struct MovingAverageWindow {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
    sum: f64,
    sum_of_squares: f64,
}

impl MovingAverageWindow {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            next: 0,
            filled: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of samples currently contributing to the statistics.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Record a sample. Returns `true` when this sample completes another
    /// full window.
    pub fn add(&mut self, sample: f64) -> bool {
        let evicted = self.samples[self.next];
        self.samples[self.next] = sample;
        if self.filled == self.samples.len() {
            self.sum += sample - evicted;
            self.sum_of_squares += sample * sample - evicted * evicted;
        } else {
            self.filled += 1;
            self.sum += sample;
            self.sum_of_squares += sample * sample;
        }

        self.next += 1;
        if self.next < self.samples.len() {
            return false;
        }
        self.next = 0;
        // resum once per lap so float error never accumulates past one window
        self.sum = self.samples.iter().sum();
        self.sum_of_squares = self.samples.iter().map(|s| s * s).sum();
        true
    }

    /// Mean of the current samples, zero when empty.
    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.sum / self.filled as f64
    }

    /// Population standard deviation of the current samples.
    pub fn standard_deviation(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let mean = self.average();
        let variance = self.sum_of_squares / self.filled as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }

    pub fn clear(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.next = 0;
        self.filled = 0;
        self.sum = 0.0;
        self.sum_of_squares = 0.0;
    }
}
