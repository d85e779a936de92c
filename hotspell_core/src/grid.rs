//! Grid topology - a small atlas of rectangular faces joined along declared
//! edges.
//!
//! Two common shapes fall out of the same machinery:
//! - a single face with its `Left` and `Right` edges glued models a
//!   cylindrical longitude (periodic in the zonal direction);
//! - several faces with arbitrary edge gluings (including reversal and axis
//!   swap) model a tiled sphere such as a cubed-sphere ocean grid.
//!
//! The whole topology is exposed through one primitive, [`Grid::neighbor`]:
//! given a cell and one of the 8 compass offsets, return the adjacent cell or
//! `None` at a true boundary. Everything downstream (labelling, tracking) is
//! written against that primitive and never inspects faces directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one grid cell: a face index plus 0-based in-face coordinates
/// `(i, j)` with `i < nx` and `j < ny`.
///
/// The derived ordering (face, then i, then j) is used wherever a
/// deterministic cell order is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub face: u32,
    pub i: u32,
    pub j: u32,
}

impl Cell {
    pub fn new(face: u32, i: u32, j: u32) -> Self {
        Self { face, i, j }
    }
}

/// One side of a rectangular face.
///
/// `Left`/`Right` are the `i = 0` and `i = nx - 1` columns; `Bottom`/`Top`
/// are the `j = 0` and `j = ny - 1` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeSide {
    Left,
    Right,
    Top,
    Bottom,
}

impl EdgeSide {
    fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Top => 2,
            Self::Bottom => 3,
        }
    }
}

/// Shape of a single face: `nx` cells along `i`, `ny` cells along `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceShape {
    pub nx: u32,
    pub ny: u32,
}

impl FaceShape {
    pub fn new(nx: u32, ny: u32) -> Self {
        Self { nx, ny }
    }

    pub fn cell_count(&self) -> usize {
        self.nx as usize * self.ny as usize
    }

    fn edge_len(&self, side: EdgeSide) -> u32 {
        match side {
            EdgeSide::Left | EdgeSide::Right => self.ny,
            EdgeSide::Top | EdgeSide::Bottom => self.nx,
        }
    }
}

/// Declares that `side_a` of `face_a` is glued to `side_b` of `face_b`.
///
/// With `reversed` set, positions along the shared edge run in opposite
/// directions on the two faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLink {
    pub face_a: u32,
    pub side_a: EdgeSide,
    pub face_b: u32,
    pub side_b: EdgeSide,
    pub reversed: bool,
}

/// Errors detected while constructing a [`Grid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("invalid grid: at least one face is required")]
    NoFaces,

    #[error("invalid grid: face {face} has a zero-sized shape")]
    EmptyFace { face: u32 },

    #[error("invalid grid: edge link references unknown face {face}")]
    UnknownFace { face: u32 },

    #[error("invalid grid: more than one link declared for face {face} side {side:?}")]
    DuplicateEdge { face: u32, side: EdgeSide },

    #[error("invalid grid: linked edges have lengths {len_a} and {len_b}")]
    EdgeLengthMismatch { len_a: u32, len_b: u32 },
}

/// Resolved gluing for one face side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Glue {
    face: u32,
    side: EdgeSide,
    reversed: bool,
}

/// An immutable atlas of faces plus resolved edge gluings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    faces: Vec<FaceShape>,
    glue: Vec<[Option<Glue>; 4]>,
    offsets: Vec<usize>,
    total: usize,
}

impl Grid {
    /// Build a grid from face shapes and edge-adjacency declarations.
    pub fn new(faces: Vec<FaceShape>, links: &[EdgeLink]) -> Result<Self, GridError> {
        if faces.is_empty() {
            return Err(GridError::NoFaces);
        }
        for (f, shape) in faces.iter().enumerate() {
            if shape.nx == 0 || shape.ny == 0 {
                return Err(GridError::EmptyFace { face: f as u32 });
            }
        }

        let mut glue: Vec<[Option<Glue>; 4]> = vec![[None; 4]; faces.len()];
        for link in links {
            for face in [link.face_a, link.face_b] {
                if face as usize >= faces.len() {
                    return Err(GridError::UnknownFace { face });
                }
            }
            let len_a = faces[link.face_a as usize].edge_len(link.side_a);
            let len_b = faces[link.face_b as usize].edge_len(link.side_b);
            if len_a != len_b {
                return Err(GridError::EdgeLengthMismatch { len_a, len_b });
            }

            let mut attach = |face: u32, side: EdgeSide, to: Glue| -> Result<(), GridError> {
                let slot = &mut glue[face as usize][side.index()];
                if slot.is_some() {
                    return Err(GridError::DuplicateEdge { face, side });
                }
                *slot = Some(to);
                Ok(())
            };
            attach(
                link.face_a,
                link.side_a,
                Glue {
                    face: link.face_b,
                    side: link.side_b,
                    reversed: link.reversed,
                },
            )?;
            // A side glued to itself needs only the one entry.
            if (link.face_a, link.side_a) != (link.face_b, link.side_b) {
                attach(
                    link.face_b,
                    link.side_b,
                    Glue {
                        face: link.face_a,
                        side: link.side_a,
                        reversed: link.reversed,
                    },
                )?;
            }
        }

        let mut offsets = Vec::with_capacity(faces.len());
        let mut total = 0usize;
        for shape in &faces {
            offsets.push(total);
            total += shape.cell_count();
        }

        Ok(Self {
            faces,
            glue,
            offsets,
            total,
        })
    }

    /// Single face with the zonal direction periodic: `Left` glued to
    /// `Right`. Models a full latitude band or a global cylinder.
    pub fn cylindrical(nx: u32, ny: u32) -> Result<Self, GridError> {
        Self::new(
            vec![FaceShape::new(nx, ny)],
            &[EdgeLink {
                face_a: 0,
                side_a: EdgeSide::Left,
                face_b: 0,
                side_b: EdgeSide::Right,
                reversed: false,
            }],
        )
    }

    /// Single face with no gluings: a plain bounded plane.
    pub fn plane(nx: u32, ny: u32) -> Result<Self, GridError> {
        Self::new(vec![FaceShape::new(nx, ny)], &[])
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn face(&self, face: u32) -> FaceShape {
        self.faces[face as usize]
    }

    /// Total number of cells across all faces.
    pub fn cell_count(&self) -> usize {
        self.total
    }

    /// Flat index of a cell, unique across the grid. Layout is per-face
    /// row-major: `offset[face] + j * nx + i`.
    pub fn flat_index(&self, cell: Cell) -> usize {
        let shape = self.faces[cell.face as usize];
        self.offsets[cell.face as usize] + cell.j as usize * shape.nx as usize + cell.i as usize
    }

    /// All cells of the grid, in flat-index order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.faces.iter().enumerate().flat_map(|(f, shape)| {
            let (nx, ny) = (shape.nx, shape.ny);
            (0..ny).flat_map(move |j| (0..nx).map(move |i| Cell::new(f as u32, i, j)))
        })
    }

    /// The adjacent cell one compass step away, or `None` at a true boundary.
    ///
    /// `di` and `dj` are each in `{-1, 0, 1}` and not both zero. A step that
    /// leaves the face through exactly one glued side transfers to the linked
    /// face, applying edge reversal as declared. A diagonal step that leaves
    /// through two sides at once (a face corner) has no neighbour.
    pub fn neighbor(&self, cell: Cell, di: i32, dj: i32) -> Option<Cell> {
        debug_assert!(di.abs() <= 1 && dj.abs() <= 1 && (di, dj) != (0, 0));
        let shape = self.faces[cell.face as usize];
        let ii = cell.i as i64 + di as i64;
        let jj = cell.j as i64 + dj as i64;
        let i_in = ii >= 0 && ii < shape.nx as i64;
        let j_in = jj >= 0 && jj < shape.ny as i64;

        match (i_in, j_in) {
            (true, true) => Some(Cell::new(cell.face, ii as u32, jj as u32)),
            (false, false) => None,
            (false, true) => {
                let side = if ii < 0 { EdgeSide::Left } else { EdgeSide::Right };
                self.cross(cell.face, side, jj as u32)
            }
            (true, false) => {
                let side = if jj < 0 { EdgeSide::Bottom } else { EdgeSide::Top };
                self.cross(cell.face, side, ii as u32)
            }
        }
    }

    /// Transfer through a glued side at along-edge position `t`.
    fn cross(&self, face: u32, side: EdgeSide, t: u32) -> Option<Cell> {
        let glue = self.glue[face as usize][side.index()]?;
        let dst = self.faces[glue.face as usize];
        let len = dst.edge_len(glue.side);
        let t = if glue.reversed { len - 1 - t } else { t };
        Some(match glue.side {
            EdgeSide::Left => Cell::new(glue.face, 0, t),
            EdgeSide::Right => Cell::new(glue.face, dst.nx - 1, t),
            EdgeSide::Bottom => Cell::new(glue.face, t, 0),
            EdgeSide::Top => Cell::new(glue.face, t, dst.ny - 1),
        })
    }
}
