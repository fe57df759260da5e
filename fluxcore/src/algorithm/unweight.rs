/// Growth factor applied to the max weight when an entry exceeds it.
pub const MAX_WEIGHT_BUMP: f64 = 1.01;

/// Accept/reject sampler turning a weighted entry stream into an unweighted one.
///
/// An entry of weight `w` survives with probability `w / max_weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionSampler {
    max_weight: f64,
}

impl RejectionSampler {
    pub fn new(max_weight: f64) -> Self {
        RejectionSampler { max_weight }
    }

    pub fn max_weight(&self) -> f64 {
        self.max_weight
    }

    /// Raise the bound when `weight` lies above it; returns the new bound if it moved.
    pub fn observe(&mut self, weight: f64) -> Option<f64> {
        if weight > self.max_weight {
            self.max_weight = weight * MAX_WEIGHT_BUMP;
            Some(self.max_weight)
        } else {
            None
        }
    }

    /// `draw` is uniform in [0, 1).
    pub fn accept(&self, weight: f64, draw: f64) -> bool {
        draw * self.max_weight < weight
    }
}
