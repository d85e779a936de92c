//! Per-day connected-component labelling on the declared topology.
//!
//! Two-pass scheme:
//! 1. label each face in isolation with a standard scan over provisional
//!    labels and a disjoint-set forest;
//! 2. union labels across glued edges (and wrap columns) through the
//!    topology's neighbour primitive, then bucket cells by root.
//!
//! The size floor (`minpix`) is applied strictly after cross-face merging, so
//! an object straddling a seam is never dropped in pieces.
//!
//! A volume mode is also provided: the same labelling applied to a stack of
//! masks with time as a third connectivity dimension, preceded by a
//! morphological close-then-open filter per slice. Each volume component
//! becomes a finished track directly, without split or merge annotations.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::grid::{Cell, Grid};
use crate::mask::DayMask;
use crate::tracker::{Track, TrackSet};
use crate::unionfind::UnionFind;

// ============================================================================
// CONNECTIVITY
// ============================================================================

/// Cell adjacency: 4-neighbour (edges only) or 8-neighbour (diagonals too).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    /// All compass offsets of this stencil.
    pub(crate) fn offsets(self) -> &'static [(i32, i32)] {
        match self {
            Self::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Self::Eight => &[
                (-1, -1),
                (0, -1),
                (1, -1),
                (-1, 0),
                (1, 0),
                (-1, 1),
                (0, 1),
                (1, 1),
            ],
        }
    }

    /// Offsets pointing at cells already visited by a row-major scan.
    fn prior(self) -> &'static [(i32, i32)] {
        match self {
            Self::Four => &[(-1, 0), (0, -1)],
            Self::Eight => &[(-1, 0), (-1, -1), (0, -1), (1, -1)],
        }
    }
}

// ============================================================================
// BLOB
// ============================================================================

/// A connected set of active cells, the unit the tracker links across days.
///
/// Cells are held sorted and deduplicated, which makes intersection counting
/// a linear merge and gives every blob a deterministic minimum cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    cells: Vec<Cell>,
}

impl Blob {
    /// Build a blob from an arbitrary cell list. Must be non-empty.
    pub fn new(mut cells: Vec<Cell>) -> Self {
        assert!(!cells.is_empty(), "a blob must contain at least one cell");
        cells.sort_unstable();
        cells.dedup();
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Smallest member cell in the global cell order.
    pub fn min_cell(&self) -> Cell {
        self.cells[0]
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.cells.binary_search(&cell).is_ok()
    }

    /// Number of cells shared with `other`, by sorted two-pointer merge.
    pub fn intersection_count(&self, other: &Blob) -> usize {
        let (mut a, mut b, mut shared) = (0usize, 0usize, 0usize);
        while a < self.cells.len() && b < other.cells.len() {
            match self.cells[a].cmp(&other.cells[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    shared += 1;
                    a += 1;
                    b += 1;
                }
            }
        }
        shared
    }

    /// Union of several blobs, used when a track absorbs every child of a
    /// split day.
    pub(crate) fn union_of(parts: &[&Blob]) -> Blob {
        let mut cells = Vec::with_capacity(parts.iter().map(|b| b.len()).sum());
        for part in parts {
            cells.extend_from_slice(&part.cells);
        }
        Blob::new(cells)
    }
}

// ============================================================================
// PER-DAY LABELLING
// ============================================================================

/// Per-face label rasters for one day, with labels already offset so they are
/// disjoint across faces: values in `1..=count`, 0 for background.
struct SliceLabels {
    face_labels: Vec<Vec<u32>>,
    count: u32,
}

impl SliceLabels {
    #[inline]
    fn at(&self, grid: &Grid, cell: Cell) -> u32 {
        let nx = grid.face(cell.face).nx as usize;
        self.face_labels[cell.face as usize][cell.j as usize * nx + cell.i as usize]
    }
}

/// In-face connected-component pass for a single face: returns a flat label
/// raster (0 background, compact labels from 1) and the label count.
fn label_face(grid: &Grid, mask: &DayMask, face: u32, conn: Connectivity) -> (Vec<u32>, u32) {
    let shape = grid.face(face);
    let (nx, ny) = (shape.nx as usize, shape.ny as usize);
    let mut labels = vec![0u32; nx * ny];

    let active = mask.active_cells().filter(|cell| cell.face == face).count();
    if active == 0 {
        return (labels, 0);
    }

    let mut forest = UnionFind::new(active);
    let mut provisional = 0u32;

    for j in 0..ny {
        for i in 0..nx {
            if !mask.get(Cell::new(face, i as u32, j as u32)) {
                continue;
            }
            let mut assigned: Option<u32> = None;
            for &(di, dj) in conn.prior() {
                let pi = i as i64 + di as i64;
                let pj = j as i64 + dj as i64;
                if pi < 0 || pj < 0 || pi >= nx as i64 || pj >= ny as i64 {
                    continue;
                }
                let l = labels[pj as usize * nx + pi as usize];
                if l == 0 {
                    continue;
                }
                match assigned {
                    None => assigned = Some(l - 1),
                    Some(prev) => {
                        forest.union(prev, l - 1);
                    }
                }
            }
            let label = assigned.unwrap_or_else(|| {
                let l = provisional;
                provisional += 1;
                l
            });
            labels[j * nx + i] = label + 1;
        }
    }

    // compact equivalence-class roots to 1..=n in first-occurrence order
    let mut remap = vec![0u32; provisional as usize];
    let mut n = 0u32;
    for l in labels.iter_mut() {
        if *l > 0 {
            let root = forest.find(*l - 1);
            if remap[root as usize] == 0 {
                n += 1;
                remap[root as usize] = n;
            }
            *l = remap[root as usize];
        }
    }
    (labels, n)
}

/// Label every face of one day and offset the labels to be globally disjoint.
fn label_cells(grid: &Grid, mask: &DayMask, conn: Connectivity) -> SliceLabels {
    let mut face_labels = Vec::with_capacity(grid.face_count());
    let mut count = 0u32;
    for f in 0..grid.face_count() {
        let (mut labels, n) = label_face(grid, mask, f as u32, conn);
        if count > 0 {
            for l in labels.iter_mut() {
                if *l > 0 {
                    *l += count;
                }
            }
        }
        count += n;
        face_labels.push(labels);
    }
    SliceLabels { face_labels, count }
}

/// Union labels joined through the topology but not through plain in-face
/// index adjacency: glued edges, wrap columns, corner gluings.
///
/// `base` offsets the labels into a larger forest (used by the volume mode).
fn topology_unions(
    grid: &Grid,
    mask: &DayMask,
    slice: &SliceLabels,
    conn: Connectivity,
    forest: &mut UnionFind,
    base: u32,
) {
    for f in 0..grid.face_count() {
        let shape = grid.face(f as u32);
        let (nx, ny) = (shape.nx, shape.ny);
        for j in 0..ny {
            for i in 0..nx {
                // only border cells can reach through a glued edge
                if i > 0 && i + 1 < nx && j > 0 && j + 1 < ny {
                    continue;
                }
                let cell = Cell::new(f as u32, i, j);
                if !mask.get(cell) {
                    continue;
                }
                for &(di, dj) in conn.offsets() {
                    let Some(nb) = grid.neighbor(cell, di, dj) else {
                        continue;
                    };
                    let in_face_adjacent = nb.face == cell.face
                        && (nb.i as i64 - cell.i as i64).abs() <= 1
                        && (nb.j as i64 - cell.j as i64).abs() <= 1;
                    if in_face_adjacent || !mask.get(nb) {
                        continue;
                    }
                    forest.union(
                        base + slice.at(grid, cell) - 1,
                        base + slice.at(grid, nb) - 1,
                    );
                }
            }
        }
    }
}

/// Label one day mask into connected objects of at least `minpix` cells.
///
/// Objects are emitted sorted by their minimum cell identifier; an empty
/// result is a warning, not an error.
pub fn label_day(grid: &Grid, mask: &DayMask, config: &Config) -> Vec<Blob> {
    assert!(mask.matches(grid), "day mask does not match the grid shape");

    let slice = label_cells(grid, mask, config.connectivity);
    if slice.count == 0 {
        tracing::warn!("empty day mask: no active cells");
        return Vec::new();
    }

    let mut forest = UnionFind::new(slice.count as usize);
    topology_unions(grid, mask, &slice, config.connectivity, &mut forest, 0);

    // every active cell carries a label from the in-face pass
    let mut buckets: HashMap<u32, Vec<Cell>> = HashMap::new();
    for cell in mask.active_cells() {
        let root = forest.find(slice.at(grid, cell) - 1);
        buckets.entry(root).or_default().push(cell);
    }

    let mut blobs: Vec<Blob> = buckets
        .into_values()
        .filter(|cells| cells.len() >= config.minpix)
        .map(Blob::new)
        .collect();
    blobs.sort_by_key(|b| b.min_cell());

    if blobs.is_empty() {
        tracing::warn!(minpix = config.minpix, "no objects above the size floor");
    }
    blobs
}

/// Label a batch of day masks, one independent day per rayon task.
pub fn label_days(grid: &Grid, masks: &[DayMask], config: &Config) -> Vec<Vec<Blob>> {
    masks
        .par_iter()
        .map(|mask| label_day(grid, mask, config))
        .collect()
}

// ============================================================================
// MORPHOLOGY
// ============================================================================

fn dilate_step(grid: &Grid, mask: &DayMask) -> DayMask {
    let mut out = mask.clone();
    for cell in grid.cells() {
        if mask.get(cell) {
            continue;
        }
        let hit = Connectivity::Eight
            .offsets()
            .iter()
            .any(|&(di, dj)| grid.neighbor(cell, di, dj).is_some_and(|nb| mask.get(nb)));
        if hit {
            out.set(cell, true);
        }
    }
    out
}

fn erode_step(grid: &Grid, mask: &DayMask) -> DayMask {
    let mut out = mask.clone();
    for cell in mask.active_cells() {
        // missing neighbours (true boundaries) count as inactive
        let keep = Connectivity::Eight
            .offsets()
            .iter()
            .all(|&(di, dj)| grid.neighbor(cell, di, dj).is_some_and(|nb| mask.get(nb)));
        if !keep {
            out.set(cell, false);
        }
    }
    out
}

/// Morphological close followed by open, both with a square-disc structuring
/// element of the given cell radius. Fills holes up to the radius, then
/// removes specks up to the radius. A radius of 0 is the identity.
pub fn close_open(grid: &Grid, mask: &DayMask, radius: u32) -> DayMask {
    let mut m = mask.clone();
    for _ in 0..radius {
        m = dilate_step(grid, &m);
    }
    for _ in 0..2 * radius {
        m = erode_step(grid, &m);
    }
    for _ in 0..radius {
        m = dilate_step(grid, &m);
    }
    m
}

// ============================================================================
// VOLUME MODE
// ============================================================================

/// Label a stack of day masks as one 3-D volume, time being the third
/// connectivity dimension, and return each component as a finished track.
///
/// Day indices are positions in `masks`. Components inherit no split or
/// merge annotations; the size floor applies to a component's total cell
/// count over its whole lifetime, and `cut_off` (when set) to its duration.
pub fn label_volume(
    grid: &Grid,
    masks: &[DayMask],
    radius: u32,
    config: &Config,
) -> Result<TrackSet, crate::config::ConfigError> {
    config.validate()?;
    for mask in masks {
        assert!(mask.matches(grid), "day mask does not match the grid shape");
    }

    let filtered: Vec<DayMask> = if radius == 0 {
        masks.to_vec()
    } else {
        masks
            .par_iter()
            .map(|mask| close_open(grid, mask, radius))
            .collect()
    };

    let slices: Vec<SliceLabels> = filtered
        .par_iter()
        .map(|mask| label_cells(grid, mask, config.connectivity))
        .collect();

    let mut offsets = Vec::with_capacity(slices.len());
    let mut total = 0u32;
    for slice in &slices {
        offsets.push(total);
        total += slice.count;
    }
    if total == 0 {
        tracing::warn!("empty volume: no active cells on any day");
        return Ok(TrackSet::default());
    }

    let mut forest = UnionFind::new(total as usize);
    for (t, slice) in slices.iter().enumerate() {
        topology_unions(grid, &filtered[t], slice, config.connectivity, &mut forest, offsets[t]);

        // temporal unions against the next slice: same cell plus the spatial
        // stencil, both through the topology primitive
        if t + 1 >= slices.len() {
            continue;
        }
        let (next_mask, next_slice) = (&filtered[t + 1], &slices[t + 1]);
        for cell in filtered[t].active_cells() {
            let here = offsets[t] + slice.at(grid, cell) - 1;
            if next_mask.get(cell) {
                forest.union(here, offsets[t + 1] + next_slice.at(grid, cell) - 1);
            }
            for &(di, dj) in config.connectivity.offsets() {
                if let Some(nb) = grid.neighbor(cell, di, dj) {
                    if next_mask.get(nb) {
                        forest.union(here, offsets[t + 1] + next_slice.at(grid, nb) - 1);
                    }
                }
            }
        }
    }

    // bucket (day, cell) pairs by component root
    let mut buckets: HashMap<u32, BTreeMap<u32, Vec<Cell>>> = HashMap::new();
    for (t, slice) in slices.iter().enumerate() {
        for cell in filtered[t].active_cells() {
            let root = forest.find(offsets[t] + slice.at(grid, cell) - 1);
            buckets
                .entry(root)
                .or_default()
                .entry(t as u32)
                .or_default()
                .push(cell);
        }
    }

    let mut components: Vec<Vec<(u32, Blob)>> = buckets
        .into_values()
        .filter(|by_day| by_day.values().map(|cells| cells.len()).sum::<usize>() >= config.minpix)
        .map(|by_day| {
            by_day
                .into_iter()
                .map(|(t, cells)| (t, Blob::new(cells)))
                .collect()
        })
        .collect();
    components.sort_by_key(|days| (days[0].0, days[0].1.min_cell()));

    let mut order_within_day: HashMap<u32, u32> = HashMap::new();
    let mut tracks = Vec::with_capacity(components.len());
    for component in components {
        let ori_day = component[0].0;
        let order = order_within_day.entry(ori_day).or_insert(0);
        let ori_order = *order;
        *order += 1;
        let (days, objects): (Vec<u32>, Vec<Blob>) = component.into_iter().unzip();
        tracks.push(Track::from_parts(ori_day, ori_order, days, objects));
    }

    let mut set = TrackSet::from_tracks(tracks);
    if let Some(min_days) = config.cut_off {
        set.apply_cut_off(min_days);
    }
    Ok(set)
}
