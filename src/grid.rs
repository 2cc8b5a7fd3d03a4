//! Halo-bordered byte grid and the anneal transition rule.
//!
//! The grid stores `(lines + 2) x (width + 2)` single-byte cells. The outer
//! ring is a halo: it never carries authoritative state between steps and is
//! rewritten from the opposite interior edges before every transition, which
//! is what realizes the torus topology without per-cell wrap arithmetic in
//! the hot path. Interior cells live at rows `1..=lines`, columns
//! `1..=width`.

use crate::rng::Lcg64;
use rayon::prelude::*;

/// Default interior width (cells per row). Overridable at startup via
/// `--width` or the config file.
pub const XSIZE: usize = 1024;

/// Anneal rule: next state indexed by the 9-cell neighborhood sum (0..=9).
/// Sums {4,6,7,8,9} -> alive, {0,1,2,3,5} -> dead.
pub const RULE: [u8; 10] = [0, 0, 0, 0, 1, 0, 1, 1, 1, 1];

#[derive(Clone, PartialEq, Debug)]
pub struct Grid {
    width: usize,
    lines: usize,
    /// Row-major, stride `width + 2`, `lines + 2` rows including the halo.
    cells: Vec<u8>,
}

impl Grid {
    /// Allocate an all-dead grid (interior and halo).
    pub fn new(width: usize, lines: usize) -> Self {
        assert!(width >= 1 && lines >= 1, "grid dimensions must be >= 1");
        Self {
            width,
            lines,
            cells: vec![0u8; (lines + 2) * (width + 2)],
        }
    }

    /// Rebuild a grid from raw device output. `raw` must be a full
    /// halo-bordered buffer of `(lines + 2) * (width + 2)` bytes.
    pub fn from_raw(width: usize, lines: usize, raw: Vec<u8>) -> Self {
        assert_eq!(raw.len(), (lines + 2) * (width + 2));
        Self { width, lines, cells: raw }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn raw(&self) -> &[u8] {
        &self.cells
    }

    #[inline]
    fn idx(&self, row: usize, col: usize) -> usize {
        row * (self.width + 2) + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[self.idx(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        let i = self.idx(row, col);
        self.cells[i] = value;
    }

    /// Fill the interior with an independent coin flip per cell, row-major.
    /// The halo is left at zero; it is populated by `sync_boundary` before
    /// the first transition ever reads it.
    pub fn randomize(&mut self, rng: &mut Lcg64) {
        for row in 1..=self.lines {
            for col in 1..=self.width {
                let i = self.idx(row, col);
                self.cells[i] = rng.next_cell();
            }
        }
    }

    /// Populate the halo from the opposite interior edges (torus wrap).
    ///
    /// Writes only halo cells, reads only interior cells, so every copy in
    /// here is independent of every other. Must run on a buffer before that
    /// buffer is used as a transition source.
    pub fn sync_boundary(&mut self) {
        let (w, l) = (self.width, self.lines);
        // Top/bottom halo rows from the far interior rows.
        for col in 1..=w {
            let top = self.cells[self.idx(l, col)];
            let bottom = self.cells[self.idx(1, col)];
            let i0 = self.idx(0, col);
            let i1 = self.idx(l + 1, col);
            self.cells[i0] = top;
            self.cells[i1] = bottom;
        }
        // Left/right halo columns from the far interior columns.
        for row in 1..=l {
            let left = self.cells[self.idx(row, w)];
            let right = self.cells[self.idx(row, 1)];
            let i0 = self.idx(row, 0);
            let i1 = self.idx(row, w + 1);
            self.cells[i0] = left;
            self.cells[i1] = right;
        }
        // Corners wrap on both axes: each halo corner mirrors the
        // diagonally opposite interior corner.
        let tl = self.cells[self.idx(l, w)];
        let tr = self.cells[self.idx(l, 1)];
        let bl = self.cells[self.idx(1, w)];
        let br = self.cells[self.idx(1, 1)];
        let i = self.idx(0, 0);
        self.cells[i] = tl;
        let i = self.idx(0, w + 1);
        self.cells[i] = tr;
        let i = self.idx(l + 1, 0);
        self.cells[i] = bl;
        let i = self.idx(l + 1, w + 1);
        self.cells[i] = br;
    }

    /// Neighborhood sum (the cell itself plus its 8 neighbors) read straight
    /// from the buffer. Valid for interior cells once the halo is synced.
    #[inline]
    pub fn neighborhood_sum(&self, row: usize, col: usize) -> u8 {
        let s = self.width + 2;
        let above = (row - 1) * s + col;
        let here = row * s + col;
        let below = (row + 1) * s + col;
        self.cells[above - 1]
            + self.cells[above]
            + self.cells[above + 1]
            + self.cells[here - 1]
            + self.cells[here]
            + self.cells[here + 1]
            + self.cells[below - 1]
            + self.cells[below]
            + self.cells[below + 1]
    }

    /// One transition step: compute every interior cell of `dst` from the
    /// fully boundary-synced `self`. Interior rows are independent, so they
    /// are farmed out to rayon; the destination halo is left untouched (the
    /// next `sync_boundary` overwrites it anyway).
    pub fn step_into(&self, dst: &mut Grid) {
        assert_eq!((self.width, self.lines), (dst.width, dst.lines));
        let stride = self.width + 2;
        let width = self.width;
        // Skip the halo row at the top, then one chunk per interior row.
        dst.cells[stride..(self.lines + 1) * stride]
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(r, dst_row)| {
                let row = r + 1;
                for col in 1..=width {
                    let sum = self.neighborhood_sum(row, col);
                    dst_row[col] = RULE[sum as usize];
                }
            });
    }

    /// Interior bytes in row-major order, halo excluded. This is the buffer
    /// the final digest is computed over.
    pub fn interior_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.lines * self.width);
        for row in 1..=self.lines {
            let start = self.idx(row, 1);
            out.extend_from_slice(&self.cells[start..start + self.width]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Oracle: neighborhood sum by modular indexing over the interior,
    /// ignoring the halo entirely.
    fn modular_sum(grid: &Grid, row: usize, col: usize) -> u8 {
        let (w, l) = (grid.width() as isize, grid.lines() as isize);
        let mut sum = 0;
        for dr in -1..=1isize {
            for dc in -1..=1isize {
                let r = (row as isize - 1 + dr).rem_euclid(l) as usize + 1;
                let c = (col as isize - 1 + dc).rem_euclid(w) as usize + 1;
                sum += grid.get(r, c);
            }
        }
        sum
    }

    fn random_grid(width: usize, lines: usize, seed: u64) -> Grid {
        let mut grid = Grid::new(width, lines);
        let mut rng = Lcg64::new(seed);
        grid.randomize(&mut rng);
        grid
    }

    #[test]
    fn test_rule_table_closure() {
        // Every neighborhood sum is 0..=9 and maps exactly per the table.
        for bits in 0u16..512 {
            let sum: u32 = (0..9).map(|i| (bits >> i) as u32 & 1).sum();
            assert!(sum <= 9);
            let expected = matches!(sum, 4 | 6 | 7 | 8 | 9) as u8;
            assert_eq!(RULE[sum as usize], expected, "sum {}", sum);
        }
    }

    #[test]
    fn test_randomize_leaves_halo_zero() {
        let grid = random_grid(8, 5, 3);
        for col in 0..grid.width() + 2 {
            assert_eq!(grid.get(0, col), 0);
            assert_eq!(grid.get(grid.lines() + 1, col), 0);
        }
        for row in 0..grid.lines() + 2 {
            assert_eq!(grid.get(row, 0), 0);
            assert_eq!(grid.get(row, grid.width() + 2 - 1), 0);
        }
    }

    #[test]
    fn test_boundary_matches_modular_indexing() {
        let mut grid = random_grid(16, 9, 11);
        let interior_before = grid.interior_bytes();
        grid.sync_boundary();
        // Interior untouched by the halo fill.
        assert_eq!(grid.interior_bytes(), interior_before);
        // Halo-based and modular neighbor sums agree for every interior
        // cell, in particular edges and corners.
        for row in 1..=grid.lines() {
            for col in 1..=grid.width() {
                assert_eq!(
                    grid.neighborhood_sum(row, col),
                    modular_sum(&grid, row, col),
                    "mismatch at ({}, {})",
                    row,
                    col
                );
            }
        }
    }

    #[test]
    fn test_single_row_torus_self_wrap() {
        // lines = 1: the row wraps onto itself vertically while columns
        // still wrap across the full width.
        let mut grid = random_grid(16, 1, 5);
        grid.sync_boundary();
        for col in 1..=grid.width() {
            assert_eq!(grid.get(0, col), grid.get(1, col));
            assert_eq!(grid.get(2, col), grid.get(1, col));
            assert_eq!(
                grid.neighborhood_sum(1, col),
                modular_sum(&grid, 1, col),
                "column {}",
                col
            );
        }
    }

    #[test]
    fn test_corner_wrap() {
        let mut grid = Grid::new(4, 4);
        grid.set(4, 4, 1); // bottom-right interior corner
        grid.sync_boundary();
        // Top-left halo corner sees the bottom-right interior corner.
        assert_eq!(grid.get(0, 0), 1);
        assert_eq!(grid.get(0, 5), 0);
        assert_eq!(grid.get(5, 0), 0);
        assert_eq!(grid.get(5, 5), 0);
    }

    #[test]
    fn test_lone_cell_anneals_away() {
        // 4x4 torus, single live cell: every neighborhood sums to 0 or 1,
        // both of which map to dead.
        let mut src = Grid::new(4, 4);
        src.set(2, 2, 1);
        src.sync_boundary();
        let mut dst = Grid::new(4, 4);
        src.step_into(&mut dst);
        assert_eq!(dst.interior_bytes(), vec![0u8; 16]);
    }

    #[test]
    fn test_block_is_fixed_point() {
        // 2x2 live block on a 4x4 torus: each block cell sums to 4 (alive),
        // every other interior cell sums to at most 2 (dead).
        let mut src = Grid::new(4, 4);
        for (r, c) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
            src.set(r, c, 1);
        }
        src.sync_boundary();
        let mut dst = Grid::new(4, 4);
        src.step_into(&mut dst);
        assert_eq!(dst.interior_bytes(), src.interior_bytes());
    }

    #[test]
    fn test_step_never_writes_destination_halo() {
        let mut src = random_grid(8, 8, 17);
        src.sync_boundary();
        let mut dst = Grid::new(8, 8);
        // Poison the destination halo to catch any write.
        for col in 0..dst.width() + 2 {
            dst.set(0, col, 7);
            dst.set(9, col, 7);
        }
        for row in 0..dst.lines() + 2 {
            dst.set(row, 0, 7);
            dst.set(row, 9, 7);
        }
        src.step_into(&mut dst);
        for col in 0..dst.width() + 2 {
            assert_eq!(dst.get(0, col), 7);
            assert_eq!(dst.get(9, col), 7);
        }
        for row in 0..dst.lines() + 2 {
            assert_eq!(dst.get(row, 0), 7);
            assert_eq!(dst.get(row, 9), 7);
        }
    }

    #[test]
    fn test_parallel_step_matches_sequential() {
        // The rayon step and a strictly sequential scan must agree exactly;
        // cell updates within a step are independent by construction.
        let mut src = random_grid(32, 24, 23);
        src.sync_boundary();

        let mut parallel = Grid::new(32, 24);
        src.step_into(&mut parallel);

        let mut sequential = Grid::new(32, 24);
        for row in 1..=src.lines() {
            for col in 1..=src.width() {
                let sum = src.neighborhood_sum(row, col);
                sequential.set(row, col, RULE[sum as usize]);
            }
        }
        assert_eq!(parallel.interior_bytes(), sequential.interior_bytes());
    }
}
