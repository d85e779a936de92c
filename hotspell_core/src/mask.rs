//! Per-day boolean activity field, shaped against a [`Grid`] at construction.
//!
//! A mask records, for one day, which cells are in an extreme state. Masks are
//! transient inputs: the labeller borrows one, produces objects, and the
//! caller may then drop or reuse it.

use crate::grid::{Cell, Grid};

/// Grid-shaped boolean field for a single day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayMask {
    offsets: Vec<usize>,
    widths: Vec<usize>,
    bits: Vec<bool>,
}

impl DayMask {
    /// An all-inactive mask shaped like `grid`.
    pub fn new(grid: &Grid) -> Self {
        let mut offsets = Vec::with_capacity(grid.face_count());
        let mut widths = Vec::with_capacity(grid.face_count());
        let mut total = 0usize;
        for f in 0..grid.face_count() {
            let shape = grid.face(f as u32);
            offsets.push(total);
            widths.push(shape.nx as usize);
            total += shape.cell_count();
        }
        Self {
            offsets,
            widths,
            bits: vec![false; total],
        }
    }

    /// Build a mask by evaluating `pred` at every cell.
    pub fn from_fn(grid: &Grid, mut pred: impl FnMut(Cell) -> bool) -> Self {
        let mut mask = Self::new(grid);
        for cell in grid.cells() {
            if pred(cell) {
                mask.set(cell, true);
            }
        }
        mask
    }

    #[inline]
    fn index(&self, cell: Cell) -> usize {
        self.offsets[cell.face as usize] + cell.j as usize * self.widths[cell.face as usize] + cell.i as usize
    }

    #[inline]
    pub fn get(&self, cell: Cell) -> bool {
        self.bits[self.index(cell)]
    }

    #[inline]
    pub fn set(&mut self, cell: Cell, active: bool) {
        let idx = self.index(cell);
        self.bits[idx] = active;
    }

    /// Total number of cells in the mask.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// All currently active cells, in flat-index order (per face, row-major).
    pub fn active_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.offsets.len()).flat_map(move |f| {
            let start = self.offsets[f];
            let end = self.offsets.get(f + 1).copied().unwrap_or(self.bits.len());
            let nx = self.widths[f];
            self.bits[start..end]
                .iter()
                .enumerate()
                .filter(|&(_, &active)| active)
                .map(move |(idx, _)| Cell::new(f as u32, (idx % nx) as u32, (idx / nx) as u32))
        })
    }

    /// Whether the mask's shape matches `grid`. Used as a cheap precondition
    /// check by consumers; a mismatch is a caller bug, not a data condition.
    pub fn matches(&self, grid: &Grid) -> bool {
        self.bits.len() == grid.cell_count() && self.offsets.len() == grid.face_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::FaceShape;

    #[test]
    fn set_and_get_round_trip() {
        let grid = Grid::cylindrical(10, 5).unwrap();
        let mut mask = DayMask::new(&grid);
        assert_eq!(mask.active_count(), 0);
        let cell = Cell::new(0, 3, 2);
        mask.set(cell, true);
        assert!(mask.get(cell));
        assert!(!mask.get(Cell::new(0, 3, 3)));
        assert_eq!(mask.active_count(), 1);
    }

    #[test]
    fn from_fn_covers_every_face() {
        let grid = Grid::new(
            vec![FaceShape::new(3, 2), FaceShape::new(2, 4)],
            &[],
        )
        .unwrap();
        let mask = DayMask::from_fn(&grid, |cell| cell.face == 1);
        assert_eq!(mask.active_count(), 8);
        assert!(!mask.get(Cell::new(0, 0, 0)));
        assert!(mask.get(Cell::new(1, 1, 3)));
        assert!(mask.matches(&grid));
        assert!(mask.active_cells().all(|cell| cell.face == 1));
        assert_eq!(mask.active_cells().count(), 8);
    }

    #[test]
    fn active_cells_visits_exactly_the_set_cells() {
        let grid = Grid::cylindrical(8, 4).unwrap();
        let mut mask = DayMask::new(&grid);
        for cell in [Cell::new(0, 1, 0), Cell::new(0, 7, 2), Cell::new(0, 0, 3)] {
            mask.set(cell, true);
        }
        // flat-index order: row-major within the face
        let active: Vec<Cell> = mask.active_cells().collect();
        assert_eq!(
            active,
            vec![Cell::new(0, 1, 0), Cell::new(0, 7, 2), Cell::new(0, 0, 3)]
        );
    }
}
