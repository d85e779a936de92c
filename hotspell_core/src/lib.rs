//! Hotspell Core - spatiotemporal extreme-event tracking on gridded
//! geophysical fields (marine heatwaves being the canonical use).
//!
//! Given a time series of binary day masks on a longitude-latitude grid, the
//! library solves four problems that naive per-day blob detection gets wrong:
//! 1. **Seam Problem**: objects straddling the periodic longitude column, or
//!    a glued face edge of a tiled sphere, are labelled as one object via a
//!    topology-aware union pass.
//! 2. **Identity Problem**: objects are linked day to day by pixel overlap
//!    into tracks, with splits absorbed and merges resolved deterministically.
//! 3. **Comparability Problem**: every track is projected into a shared
//!    polar and lifecycle-phase frame, so events of different sizes, shapes
//!    and lifetimes can be composited.
//! 4. **Missing-Data Problem**: degenerate days, zero-radius tracks and
//!    empty archives degrade to NaN locally instead of failing the run.
//!
//! Pipeline: masks + topology -> [`label_day`] -> [`Tracker`] ->
//! [`normalize_tracks`] -> [`composite`].

pub mod composite;
pub mod config;
pub mod geodesy;
pub mod grid;
pub mod label;
pub mod mask;
pub mod normalize;
pub mod tracker;
pub mod unionfind;

// Re-export key types for convenience
pub use composite::{composite, Composite, CompositeMethod};
pub use config::{Config, ConfigError};
pub use geodesy::{blob_centroid, blob_radius_km, haversine_km, track_radius_km, EARTH_RADIUS_KM};
pub use grid::{Cell, EdgeLink, EdgeSide, FaceShape, Grid, GridError};
pub use label::{close_open, label_day, label_days, label_volume, Blob, Connectivity};
pub use mask::DayMask;
pub use normalize::{
    normalize_tracks, project_blob, AnomalyField, NormalizeError, PhaseSlice, PhaseTensor,
    PolarFrame,
};
pub use tracker::{overlap, track_days, track_masks, Track, TrackSet, Tracker};
pub use unionfind::UnionFind;
