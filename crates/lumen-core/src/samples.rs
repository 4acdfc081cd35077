use serde::{Deserialize, Serialize};

/// Running sample totals, split by normalization convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleCounters {
    per_pixel_normalized: f64,
    per_screen_normalized: f64,
}

impl SampleCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_per_pixel_normalized(&mut self, count: f64) {
        self.per_pixel_normalized += count;
    }

    pub fn add_per_screen_normalized(&mut self, count: f64) {
        self.per_screen_normalized += count;
    }

    /// Samples accumulated into the per-pixel normalized channels.
    pub fn per_pixel_normalized(&self) -> f64 {
        self.per_pixel_normalized
    }

    /// Samples accumulated into the per-screen normalized channels. The
    /// merge divides the pixel count by this to get the screen-wide factor.
    pub fn per_screen_normalized(&self) -> f64 {
        self.per_screen_normalized
    }

    pub fn total(&self) -> f64 {
        self.per_pixel_normalized + self.per_screen_normalized
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_separately() {
        let mut c = SampleCounters::new();
        c.add_per_pixel_normalized(16.0);
        c.add_per_screen_normalized(8.0);
        c.add_per_screen_normalized(8.0);
        assert_eq!(c.per_pixel_normalized(), 16.0);
        assert_eq!(c.per_screen_normalized(), 16.0);
        assert_eq!(c.total(), 32.0);
        c.clear();
        assert_eq!(c.total(), 0.0);
    }
}
