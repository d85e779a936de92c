//! Spatial-temporal normalization of tracks onto a standard polar frame.
//!
//! Every track is projected into the same coordinate system so that events of
//! different sizes, shapes and lifetimes can be composited:
//! - space: a polar grid on the unit disc, scaled by the track's largest
//!   cell-to-centroid distance, sampled from the anomaly field by bilinear
//!   interpolation;
//! - time: the track's lifetime mapped onto a fixed number of lifecycle
//!   phases by linear resampling.
//!
//! Degenerate inputs never abort the run: a day whose interpolation has no
//! support contributes a missing (NaN) slice, a zero-radius track is skipped
//! whole, and the shared tensor keeps NaN wherever no data arrived.

use nalgebra::DMatrix;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::geodesy::{blob_centroid, haversine_km, track_radius_km};
use crate::label::Blob;
use crate::tracker::TrackSet;

// ============================================================================
// ERRORS
// ============================================================================

/// Configuration or shape problems that fail the whole normalization run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("shape mismatch: field buffer holds {actual} values, axes imply {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("shape mismatch: {axis} coordinates must be strictly increasing")]
    AxisOrder { axis: &'static str },

    #[error("shape mismatch: track cell (face {face}, i {i}, j {j}) lies outside the field grid")]
    CellOutOfGrid { face: u32, i: u32, j: u32 },

    #[error("shape mismatch: track day {day} exceeds the field's {n_days} days")]
    DayOutOfRange { day: u32, n_days: usize },
}

// ============================================================================
// ANOMALY FIELD
// ============================================================================

/// Read-only view over a row-major 4-D anomaly array `D[lon, lat, day, var]`
/// plus its coordinate vectors. The normalizer only reads.
#[derive(Debug, Clone)]
pub struct AnomalyField<'a> {
    data: &'a [f64],
    lon: &'a [f64],
    lat: &'a [f64],
    n_days: usize,
    n_vars: usize,
}

impl<'a> AnomalyField<'a> {
    pub fn new(
        data: &'a [f64],
        lon: &'a [f64],
        lat: &'a [f64],
        n_days: usize,
        n_vars: usize,
    ) -> Result<Self, NormalizeError> {
        let expected = lon.len() * lat.len() * n_days * n_vars;
        if data.len() != expected {
            return Err(NormalizeError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        if lon.windows(2).any(|w| w[0] >= w[1]) {
            return Err(NormalizeError::AxisOrder { axis: "longitude" });
        }
        if lat.windows(2).any(|w| w[0] >= w[1]) {
            return Err(NormalizeError::AxisOrder { axis: "latitude" });
        }
        Ok(Self {
            data,
            lon,
            lat,
            n_days,
            n_vars,
        })
    }

    pub fn n_lon(&self) -> usize {
        self.lon.len()
    }

    pub fn n_lat(&self) -> usize {
        self.lat.len()
    }

    pub fn n_days(&self) -> usize {
        self.n_days
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn lon(&self) -> &[f64] {
        self.lon
    }

    pub fn lat(&self) -> &[f64] {
        self.lat
    }

    #[inline]
    pub fn at(&self, lon_idx: usize, lat_idx: usize, day: usize, var: usize) -> f64 {
        self.data[((lon_idx * self.lat.len() + lat_idx) * self.n_days + day) * self.n_vars + var]
    }
}

// ============================================================================
// POLAR FRAME
// ============================================================================

/// Precomputed polar target points on the unit disc.
///
/// `x[(r, θ)] = (r / (R-1)) · sin(2πθ/R)` and `y` with the cosine, so the
/// radial index runs from the centre outward and the angular index sweeps a
/// full turn.
#[derive(Debug, Clone)]
pub struct PolarFrame {
    resolution: usize,
    x: DMatrix<f64>,
    y: DMatrix<f64>,
}

impl PolarFrame {
    pub fn new(resolution: usize) -> Self {
        let r_scale = (resolution - 1) as f64;
        let mut x = DMatrix::zeros(resolution, resolution);
        let mut y = DMatrix::zeros(resolution, resolution);
        for r in 0..resolution {
            let rho = r as f64 / r_scale;
            for th in 0..resolution {
                let angle = std::f64::consts::TAU * th as f64 / resolution as f64;
                x[(r, th)] = rho * angle.sin();
                y[(r, th)] = rho * angle.cos();
            }
        }
        Self { resolution, x, y }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }
}

// ============================================================================
// PHASE TENSOR
// ============================================================================

/// The shared output frame: row-major `T[r, θ, phase, track, var]`, NaN
/// wherever no data arrived.
#[derive(Debug, Clone)]
pub struct PhaseTensor {
    data: Vec<f64>,
    resolution: usize,
    n_phases: usize,
    n_tracks: usize,
    n_vars: usize,
}

impl PhaseTensor {
    pub fn new(resolution: usize, n_phases: usize, n_tracks: usize, n_vars: usize) -> Self {
        Self {
            data: vec![f64::NAN; resolution * resolution * n_phases * n_tracks * n_vars],
            resolution,
            n_phases,
            n_tracks,
            n_vars,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn n_phases(&self) -> usize {
        self.n_phases
    }

    pub fn n_tracks(&self) -> usize {
        self.n_tracks
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    #[inline]
    fn index(&self, r: usize, th: usize, p: usize, n: usize, v: usize) -> usize {
        (((r * self.resolution + th) * self.n_phases + p) * self.n_tracks + n) * self.n_vars + v
    }

    #[inline]
    pub fn get(&self, r: usize, th: usize, p: usize, n: usize, v: usize) -> f64 {
        self.data[self.index(r, th, p, n, v)]
    }

    #[inline]
    pub fn set(&mut self, r: usize, th: usize, p: usize, n: usize, v: usize, value: f64) {
        let idx = self.index(r, th, p, n, v);
        self.data[idx] = value;
    }

    /// Read-only view of one (track, variable) slice.
    pub fn slice(&self, n: usize, v: usize) -> PhaseSlice<'_> {
        debug_assert!(n < self.n_tracks && v < self.n_vars);
        PhaseSlice { tensor: self, n, v }
    }
}

/// One track's normalized frame for one variable, borrowed from the shared
/// tensor.
#[derive(Debug, Clone, Copy)]
pub struct PhaseSlice<'a> {
    tensor: &'a PhaseTensor,
    n: usize,
    v: usize,
}

impl PhaseSlice<'_> {
    pub fn resolution(&self) -> usize {
        self.tensor.resolution
    }

    pub fn n_phases(&self) -> usize {
        self.tensor.n_phases
    }

    #[inline]
    pub fn get(&self, r: usize, th: usize, p: usize) -> f64 {
        self.tensor.get(r, th, p, self.n, self.v)
    }
}

// ============================================================================
// INTERPOLATION
// ============================================================================

/// Bilinear lookup on a rectilinear grid with strictly increasing axes.
///
/// Total: targets outside the sampled rectangle, or cells with a non-finite
/// corner, yield `None` and become NaN at the call site.
fn bilinear(xs: &[f64], ys: &[f64], vals: &DMatrix<f64>, x: f64, y: f64) -> Option<f64> {
    if x < xs[0] || x > xs[xs.len() - 1] || y < ys[0] || y > ys[ys.len() - 1] {
        return None;
    }
    let hi_x = xs.partition_point(|&v| v < x).clamp(1, xs.len() - 1);
    let hi_y = ys.partition_point(|&v| v < y).clamp(1, ys.len() - 1);
    let (lo_x, lo_y) = (hi_x - 1, hi_y - 1);

    let v00 = vals[(lo_x, lo_y)];
    let v10 = vals[(hi_x, lo_y)];
    let v01 = vals[(lo_x, hi_y)];
    let v11 = vals[(hi_x, hi_y)];
    if !(v00.is_finite() && v10.is_finite() && v01.is_finite() && v11.is_finite()) {
        return None;
    }

    let tx = (x - xs[lo_x]) / (xs[hi_x] - xs[lo_x]);
    let ty = (y - ys[lo_y]) / (ys[hi_y] - ys[lo_y]);
    let bottom = v00 + (v10 - v00) * tx;
    let top = v01 + (v11 - v01) * tx;
    Some(bottom + (top - bottom) * ty)
}

/// Project one day of a track onto the polar frame.
///
/// Local coordinates are signed haversine distances from the day's centroid,
/// normalized by the track radius; the anomaly samples inside a generous
/// bounding box form a rectilinear grid in those coordinates, which the
/// polar targets then sample bilinearly. Days with fewer than 4 valid
/// samples, or a degenerate axis, come back all-NaN.
pub fn project_blob(
    blob: &Blob,
    field: &AnomalyField<'_>,
    day: usize,
    var: usize,
    r_max_km: f64,
    frame: &PolarFrame,
    earth_radius_km: f64,
) -> DMatrix<f64> {
    let res = frame.resolution();
    let nan = DMatrix::from_element(res, res, f64::NAN);
    let (lon_c, lat_c) = blob_centroid(blob, field.lon(), field.lat());

    // bounding-box prefilter; the zonal window is deliberately loose
    let lon_window = (2.0 * r_max_km).min(180.0);
    let lat_window = 2.0 * r_max_km / (earth_radius_km * std::f64::consts::PI / 180.0);

    let lon_idx: Vec<usize> = (0..field.n_lon())
        .filter(|&i| (field.lon()[i] - lon_c).abs() < lon_window)
        .collect();
    let lat_idx: Vec<usize> = (0..field.n_lat())
        .filter(|&j| (field.lat()[j] - lat_c).abs() < lat_window)
        .collect();
    if lon_idx.len() < 2 || lat_idx.len() < 2 {
        tracing::warn!(day, "interpolation support degenerate, day left missing");
        return nan;
    }

    // signed local coordinates, normalized by the track radius; x depends
    // only on the longitude index and y only on the latitude index
    let xs: Vec<f64> = lon_idx
        .iter()
        .map(|&i| {
            let lon_i = field.lon()[i];
            (lon_i - lon_c).signum() * haversine_km(lon_c, lat_c, lon_i, lat_c, earth_radius_km)
                / r_max_km
        })
        .collect();
    let ys: Vec<f64> = lat_idx
        .iter()
        .map(|&j| {
            let lat_j = field.lat()[j];
            (lat_j - lat_c).signum() * haversine_km(lon_c, lat_c, lon_c, lat_j, earth_radius_km)
                / r_max_km
        })
        .collect();

    let vals = DMatrix::from_fn(lon_idx.len(), lat_idx.len(), |a, b| {
        field.at(lon_idx[a], lat_idx[b], day, var)
    });
    if vals.iter().filter(|v| v.is_finite()).count() < 4 {
        tracing::warn!(day, "fewer than 4 valid samples, day left missing");
        return nan;
    }

    DMatrix::from_fn(res, res, |r, th| {
        bilinear(&xs, &ys, &vals, frame.x[(r, th)], frame.y[(r, th)]).unwrap_or(f64::NAN)
    })
}

/// Resample a per-day series onto `n_phases` left-edge lifecycle phases.
///
/// Original samples sit at `d / K`; non-finite samples are skipped; targets
/// outside the finite samples take the nearest one. Fewer than 2 finite
/// samples give an all-NaN result.
fn resample_phases(series: &[f64], n_phases: usize) -> Vec<f64> {
    let k = series.len();
    let points: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .map(|(d, &s)| (d as f64 / k as f64, s))
        .collect();
    if points.len() < 2 {
        return vec![f64::NAN; n_phases];
    }

    (0..n_phases)
        .map(|p| {
            let t = p as f64 / n_phases as f64;
            if t <= points[0].0 {
                return points[0].1;
            }
            if t >= points[points.len() - 1].0 {
                return points[points.len() - 1].1;
            }
            let hi = points.partition_point(|&(tp, _)| tp < t);
            let (t0, s0) = points[hi - 1];
            let (t1, s1) = points[hi];
            s0 + (s1 - s0) * (t - t0) / (t1 - t0)
        })
        .collect()
}

// ============================================================================
// DRIVER
// ============================================================================

/// Normalize every track of a set into one shared [`PhaseTensor`].
///
/// Tracks are independent and processed in parallel; a zero-radius track is
/// skipped with a warning and leaves its slice NaN.
pub fn normalize_tracks(
    tracks: &TrackSet,
    field: &AnomalyField<'_>,
    config: &Config,
) -> Result<PhaseTensor, NormalizeError> {
    config.validate()?;

    for track in tracks.iter() {
        for (&day, blob) in track.days().iter().zip(track.objects()) {
            if day as usize >= field.n_days() {
                return Err(NormalizeError::DayOutOfRange {
                    day,
                    n_days: field.n_days(),
                });
            }
            for cell in blob.cells() {
                if cell.face != 0
                    || cell.i as usize >= field.n_lon()
                    || cell.j as usize >= field.n_lat()
                {
                    return Err(NormalizeError::CellOutOfGrid {
                        face: cell.face,
                        i: cell.i,
                        j: cell.j,
                    });
                }
            }
        }
    }

    let res = config.resolution;
    let n_phases = config.n_phases;
    let n_vars = field.n_vars();
    let frame = PolarFrame::new(res);

    let per_track: Vec<Vec<f64>> = tracks
        .tracks()
        .par_iter()
        .map(|track| {
            let mut buf = vec![f64::NAN; res * res * n_phases * n_vars];
            let r_max = track_radius_km(track, field.lon(), field.lat(), config.earth_radius_km);
            if !(r_max > 0.0) {
                tracing::warn!(
                    ori_day = track.ori_day(),
                    ori_order = track.ori_order(),
                    "zero-radius track skipped"
                );
                return buf;
            }

            let k = track.days().len();
            let mut series = vec![f64::NAN; k];
            for v in 0..n_vars {
                let slices: Vec<DMatrix<f64>> = track
                    .days()
                    .iter()
                    .zip(track.objects())
                    .map(|(&day, blob)| {
                        project_blob(
                            blob,
                            field,
                            day as usize,
                            v,
                            r_max,
                            &frame,
                            config.earth_radius_km,
                        )
                    })
                    .collect();
                for r in 0..res {
                    for th in 0..res {
                        for (d, slice) in slices.iter().enumerate() {
                            series[d] = slice[(r, th)];
                        }
                        let phases = resample_phases(&series, n_phases);
                        for (p, &value) in phases.iter().enumerate() {
                            buf[((r * res + th) * n_phases + p) * n_vars + v] = value;
                        }
                    }
                }
            }
            buf
        })
        .collect();

    let mut tensor = PhaseTensor::new(res, n_phases, tracks.len(), n_vars);
    for (n, buf) in per_track.iter().enumerate() {
        for r in 0..res {
            for th in 0..res {
                for p in 0..n_phases {
                    for v in 0..n_vars {
                        let value = buf[((r * res + th) * n_phases + p) * n_vars + v];
                        tensor.set(r, th, p, n, v, value);
                    }
                }
            }
        }
    }
    Ok(tensor)
}
