//! Composite reduction across tracks.
//!
//! Collapses the track axis of a [`PhaseTensor`] with a NaN-aware aggregate,
//! producing the mean (or median, or spread) event in the shared polar and
//! lifecycle-phase frame.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::normalize::{PhaseSlice, PhaseTensor};

/// Aggregate applied along the track axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeMethod {
    Mean,
    Median,
    /// Population standard deviation.
    Std,
}

/// The reduced frame: row-major `C[r, θ, phase, var]`.
#[derive(Debug, Clone)]
pub struct Composite {
    data: Vec<f64>,
    resolution: usize,
    n_phases: usize,
    n_vars: usize,
}

impl Composite {
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn n_phases(&self) -> usize {
        self.n_phases
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    #[inline]
    pub fn get(&self, r: usize, th: usize, p: usize, v: usize) -> f64 {
        self.data[((r * self.resolution + th) * self.n_phases + p) * self.n_vars + v]
    }
}

fn reduce(values: &mut Vec<f64>, method: CompositeMethod) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    match method {
        CompositeMethod::Mean => values.iter().sum::<f64>() / n,
        CompositeMethod::Median => {
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite values compare"));
            let mid = values.len() / 2;
            if values.len() % 2 == 1 {
                values[mid]
            } else {
                (values[mid - 1] + values[mid]) / 2.0
            }
        }
        CompositeMethod::Std => {
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            var.sqrt()
        }
    }
}

/// Aggregate a tensor over its track axis, ignoring NaN inputs.
///
/// A cell with no finite input stays NaN; a tensor with no tracks at all
/// produces an all-NaN composite with a warning.
pub fn composite(tensor: &PhaseTensor, method: CompositeMethod) -> Composite {
    let res = tensor.resolution();
    let n_phases = tensor.n_phases();
    let n_vars = tensor.n_vars();
    let n_tracks = tensor.n_tracks();

    if n_tracks == 0 {
        tracing::warn!("empty track set: composite is all-missing");
        return Composite {
            data: vec![f64::NAN; res * res * n_phases * n_vars],
            resolution: res,
            n_phases,
            n_vars,
        };
    }

    // one slice view per (variable, track); the track axis is then a plain
    // walk over views
    let views: Vec<Vec<PhaseSlice<'_>>> = (0..n_vars)
        .map(|v| (0..n_tracks).map(|n| tensor.slice(n, v)).collect())
        .collect();

    let data: Vec<f64> = (0..res)
        .into_par_iter()
        .flat_map_iter(|r| {
            let mut row = Vec::with_capacity(res * n_phases * n_vars);
            let mut finite = Vec::with_capacity(n_tracks);
            for th in 0..res {
                for p in 0..n_phases {
                    for v in 0..n_vars {
                        finite.clear();
                        finite.extend(
                            views[v]
                                .iter()
                                .map(|slice| slice.get(r, th, p))
                                .filter(|x| x.is_finite()),
                        );
                        row.push(reduce(&mut finite, method));
                    }
                }
            }
            row
        })
        .collect();

    Composite {
        data,
        resolution: res,
        n_phases,
        n_vars,
    }
}
