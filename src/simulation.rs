//! CPU iteration driver: the reference backend.
//!
//! Owns the grid pair and runs the two-stage step loop: halo sync on the
//! source, transition into the destination, then a role swap. The swap is an
//! ownership exchange of the two buffers, never a copy; within one step the
//! source is read-only and the destination is write-only, which is what
//! makes the per-cell updates safe to run in any order.

use crate::grid::Grid;
use std::mem;

pub struct CpuSimulation {
    from: Grid,
    to: Grid,
}

impl CpuSimulation {
    /// Take ownership of the initialized grid; the destination buffer is
    /// allocated once here and reused for the whole run.
    pub fn new(initial: Grid) -> Self {
        let to = Grid::new(initial.width(), initial.lines());
        Self { from: initial, to }
    }

    /// Run exactly `iterations` steps and return the final grid. With zero
    /// iterations the initial configuration comes back unchanged; the halo
    /// is never synced and never read.
    pub fn run(mut self, iterations: usize) -> Grid {
        for _ in 0..iterations {
            self.from.sync_boundary();
            self.from.step_into(&mut self.to);
            mem::swap(&mut self.from, &mut self.to);
        }
        self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Lcg64;

    fn random_grid(width: usize, lines: usize, seed: u64) -> Grid {
        let mut grid = Grid::new(width, lines);
        let mut rng = Lcg64::new(seed);
        grid.randomize(&mut rng);
        grid
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let initial = random_grid(32, 16, 42);
        let expected = initial.interior_bytes();
        let after = CpuSimulation::new(initial).run(0);
        assert_eq!(after.interior_bytes(), expected);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = CpuSimulation::new(random_grid(64, 32, 42)).run(10);
        let b = CpuSimulation::new(random_grid(64, 32, 42)).run(10);
        assert_eq!(a.interior_bytes(), b.interior_bytes());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = CpuSimulation::new(random_grid(64, 32, 1)).run(4);
        let b = CpuSimulation::new(random_grid(64, 32, 2)).run(4);
        assert_ne!(a.interior_bytes(), b.interior_bytes());
    }

    #[test]
    fn test_step_count_matters() {
        // An annealing grid keeps evolving for a while; one step vs. two
        // steps from the same start must not coincide on a random grid.
        let one = CpuSimulation::new(random_grid(64, 32, 9)).run(1);
        let two = CpuSimulation::new(random_grid(64, 32, 9)).run(2);
        assert_ne!(one.interior_bytes(), two.interior_bytes());
    }

    #[test]
    fn test_block_survives_many_steps() {
        // The 2x2 block is a fixed point of the anneal rule; the driver's
        // swap bookkeeping must preserve it through an odd and an even
        // number of steps.
        let mut initial = Grid::new(4, 4);
        for (r, c) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
            initial.set(r, c, 1);
        }
        let expected = initial.interior_bytes();
        let after_odd = CpuSimulation::new(initial.clone()).run(3);
        let after_even = CpuSimulation::new(initial).run(8);
        assert_eq!(after_odd.interior_bytes(), expected);
        assert_eq!(after_even.interior_bytes(), expected);
    }
}
