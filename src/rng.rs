//! Seeded linear-congruential generator for the initial configuration.
//!
//! The generator state is an explicit object rather than process-wide state
//! so that runs (and tests) are reproducible in isolation: the same seed
//! always yields the same draw sequence, bit for bit.

/// 64-bit LCG (Knuth MMIX constants). Only used to build the initial grid;
/// the simulation itself is fully deterministic once the grid exists.
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Advance the state and return the next raw draw.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Map one draw to a cell value (alive with probability 0.5).
    ///
    /// Uses the top bit: the low bits of an LCG have short periods, the
    /// high bits don't.
    pub fn next_cell(&mut self) -> u8 {
        (self.next_u64() >> 63) as u8
    }
}
