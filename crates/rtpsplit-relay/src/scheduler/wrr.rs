//! # Weighted Round Robin over Outputs
//!
//! Each output owns a virtual-time accumulator. Sending `n` bytes through an
//! output of weight `w` advances it by `n / w` in fixed point, the division
//! remainder carried to the next charge so no byte is lost to truncation.
//! Selection picks the smallest accumulator and rebases every active output
//! on it, keeping the counters bounded.
//!
//! Outputs are active up to the first zero weight; later entries are never
//! scheduled.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputState {
    weight: u32,
    weighted_size: u64,
    remainder: u64,
}

#[derive(Debug, Clone)]
pub struct OutputScheduler {
    outputs: Vec<OutputState>,
    active: usize,
}

impl OutputScheduler {
    pub fn new(weights: &[u32]) -> Self {
        let active = weights.iter().take_while(|&&w| w > 0).count();
        OutputScheduler {
            outputs: weights
                .iter()
                .map(|&weight| OutputState {
                    weight,
                    weighted_size: 0,
                    remainder: 0,
                })
                .collect(),
            active,
        }
    }

    /// Index of the active output with the least virtual time consumed,
    /// lowest index on ties. Every active accumulator is then rebased on
    /// that minimum.
    ///
    /// Returns 0 when no output is active; startup validation rules that out.
    pub fn select(&mut self) -> usize {
        let active = &mut self.outputs[..self.active];
        let Some((chosen, min)) = active
            .iter()
            .enumerate()
            .min_by_key(|&(i, o)| (o.weighted_size, i))
            .map(|(i, o)| (i, o.weighted_size))
        else {
            return 0;
        };
        for output in active.iter_mut() {
            output.weighted_size -= min;
        }
        chosen
    }

    /// Charge `bytes` sent through output `index`.
    pub fn charge(&mut self, index: usize, bytes: usize) {
        let Some(output) = self.outputs.get_mut(index) else {
            return;
        };
        if output.weight == 0 {
            return;
        }
        let weight = u64::from(output.weight);
        let total = bytes as u64 + output.remainder;
        output.weighted_size += total / weight;
        output.remainder = total % weight;
    }

    /// Number of outputs configured, active or not.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Number of leading outputs eligible for selection.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn weight(&self, index: usize) -> Option<u32> {
        self.outputs.get(index).map(|o| o.weight)
    }

    /// Sum of the active weights.
    pub fn total_weight(&self) -> u64 {
        self.outputs[..self.active]
            .iter()
            .map(|o| u64::from(o.weight))
            .sum()
    }

    /// `(weighted_size, remainder)` of output `index`.
    pub fn accumulator(&self, index: usize) -> Option<(u64, u64)> {
        self.outputs
            .get(index)
            .map(|o| (o.weighted_size, o.remainder))
    }
}
