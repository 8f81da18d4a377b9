//! Tucker decomposition of the sparse co-occurrence tensor.
//!
//! Factors are initialised with a truncated HOSVD and refined by higher-order
//! orthogonal iteration (HOOI). Each HOOI update projects the two other modes on
//! their current factors and keeps the leading left singular vectors of the
//! resulting `dim × (r_p · r_q)` matrix. Every pass only visits the stored
//! entries, and no dense matrix grows beyond `dim × rank²` for any mode.

use nalgebra::{DMatrix, DVector, SymmetricEigen, SVD};
use ndarray::{Array2, Array3};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::tensor::SparseTensor3;

/// Extra sketch columns of the HOSVD range finder.
const OVERSAMPLING: usize = 10;
const POWER_ITERATIONS: usize = 3;
const RANGE_FINDER_SEED: u64 = 0x7c0f_fee5;
/// Singular values below this share of the largest are treated as zero.
const NEGLIGIBLE: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum DecompositionError {
    #[error("rank of mode {mode} must be at least 1")]
    ZeroRank { mode: usize },

    #[error("rank {rank} exceeds dimension {dim} of mode {mode}")]
    RankExceedsDimension { mode: usize, rank: usize, dim: usize },

    #[error("tensor entry at {coord:?} is not finite")]
    NonFinite { coord: [usize; 3] },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuckerOptions {
    pub rank: [usize; 3],
    pub max_iter: usize,
    /// HOOI stops once the relative error moves by less than this between sweeps.
    pub tol: f64,
}

impl TuckerOptions {
    pub fn uniform(rank: usize) -> Self {
        TuckerOptions {
            rank: [rank; 3],
            max_iter: 100,
            tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TuckerDecomposition {
    pub core: Array3<f64>,
    /// Word, context word and article factors, each `dim × rank` with orthonormal columns.
    pub factors: [Array2<f64>; 3],
    pub iterations: usize,
    pub relative_error: f64,
}

impl TuckerDecomposition {
    pub fn shape(&self) -> [usize; 3] {
        [
            self.factors[0].nrows(),
            self.factors[1].nrows(),
            self.factors[2].nrows(),
        ]
    }

    /// Dense `core ×₁ U₀ ×₂ U₁ ×₃ U₂`.
    pub fn reconstruct(&self) -> Array3<f64> {
        let [u0, u1, u2] = &self.factors;
        let shape = self.shape();
        let mut dense = Array3::zeros((shape[0], shape[1], shape[2]));
        for ((a, b, c), &g) in self.core.indexed_iter() {
            if g == 0. {
                continue;
            }
            for i in 0..shape[0] {
                let gi = g * u0[[i, a]];
                for j in 0..shape[1] {
                    let gij = gi * u1[[j, b]];
                    for k in 0..shape[2] {
                        dense[[i, j, k]] += gij * u2[[k, c]];
                    }
                }
            }
        }
        dense
    }
}

fn other_modes(mode: usize) -> (usize, usize) {
    match mode {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

/// Stored entries grouped into the fibers of one mode: one `(index, value)` list
/// per fixed pair of coordinates on the two other modes.
fn mode_fibers(entries: &[([usize; 3], f64)], mode: usize) -> Vec<Vec<(usize, f64)>> {
    let (p, q) = other_modes(mode);
    let mut fibers: BTreeMap<(usize, usize), Vec<(usize, f64)>> = BTreeMap::new();
    for (coord, value) in entries {
        fibers
            .entry((coord[p], coord[q]))
            .or_default()
            .push((coord[mode], *value));
    }
    fibers.into_values().collect()
}

/// `X Xᵀ basis` for the unfolding `X` described by `fibers`, without forming `X Xᵀ`.
fn gram_product(fibers: &[Vec<(usize, f64)>], basis: &DMatrix<f64>) -> DMatrix<f64> {
    let width = basis.ncols();
    let mut product = DMatrix::zeros(basis.nrows(), width);
    let mut weights = vec![0.; width];
    for fiber in fibers {
        weights.iter_mut().for_each(|w| *w = 0.);
        for &(i, x) in fiber {
            for (c, w) in weights.iter_mut().enumerate() {
                *w += x * basis[(i, c)];
            }
        }
        for &(i, x) in fiber {
            for (c, w) in weights.iter().enumerate() {
                product[(i, c)] += x * w;
            }
        }
    }
    product
}

/// Truncated HOSVD factor of one mode.
///
/// The leading left singular vectors of the unfolding are found with a
/// randomized range finder followed by a Rayleigh-Ritz step, so memory stays
/// at `dim × (rank + OVERSAMPLING)`. Small modes use the identity as range.
fn hosvd_factor(
    entries: &[([usize; 3], f64)],
    mode: usize,
    dim: usize,
    rank: usize,
) -> Array2<f64> {
    let fibers = mode_fibers(entries, mode);
    let width = dim.min(rank + OVERSAMPLING);
    let basis = if width == dim {
        DMatrix::identity(dim, dim)
    } else {
        let mut rng = StdRng::seed_from_u64(RANGE_FINDER_SEED + mode as u64);
        let dist = Uniform::new_inclusive(-1., 1.);
        let sketch = DMatrix::from_fn(dim, width, |_, _| dist.sample(&mut rng));
        let mut basis = sketch.qr().q();
        for _ in 0..POWER_ITERATIONS {
            basis = gram_product(&fibers, &basis).qr().q();
        }
        basis
    };

    let small = basis.transpose() * gram_product(&fibers, &basis);
    let eigen = SymmetricEigen::new((&small + small.transpose()) * 0.5);
    let order = descending(eigen.eigenvalues.as_slice());
    let columns = order
        .iter()
        .take(rank)
        .map(|&idx| &basis * eigen.eigenvectors.column(idx))
        .collect();
    into_factor(columns, dim, rank)
}

/// Unfolding of the tensor along `mode` after projecting the two other modes
/// on their factors: `dim × (r_p · r_q)`.
fn projected_unfolding(
    entries: &[([usize; 3], f64)],
    mode: usize,
    dim: usize,
    factors: &[Array2<f64>; 3],
) -> DMatrix<f64> {
    let (p, q) = other_modes(mode);
    let (up, uq) = (&factors[p], &factors[q]);
    let (rp, rq) = (up.ncols(), uq.ncols());
    let mut projected = DMatrix::zeros(dim, rp * rq);
    for (coord, value) in entries {
        for a in 0..rp {
            let va = value * up[[coord[p], a]];
            for b in 0..rq {
                projected[(coord[mode], a * rq + b)] += va * uq[[coord[q], b]];
            }
        }
    }
    projected
}

/// HOOI factor update: leading left singular vectors of the thin projected unfolding.
fn hooi_factor(
    entries: &[([usize; 3], f64)],
    mode: usize,
    dim: usize,
    rank: usize,
    factors: &[Array2<f64>; 3],
) -> Array2<f64> {
    let projected = projected_unfolding(entries, mode, dim, factors);
    let svd = SVD::new(projected, true, false);
    let singular_values = svd.singular_values.as_slice();
    let largest = singular_values.iter().copied().fold(0., f64::max);
    let columns = match &svd.u {
        Some(u) => descending(singular_values)
            .into_iter()
            .take(rank)
            .filter(|&idx| singular_values[idx] > largest * NEGLIGIBLE)
            .map(|idx| u.column(idx).into_owned())
            .collect(),
        None => Vec::new(),
    };
    into_factor(columns, dim, rank)
}

/// Indices of `values` from largest to smallest.
fn descending(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));
    indices
}

/// Lays orthonormal `columns` out as a `dim × rank` factor.
///
/// Missing columns are filled with unit vectors orthogonalised against the
/// others. The largest-magnitude component of every column is made positive.
fn into_factor(mut columns: Vec<DVector<f64>>, dim: usize, rank: usize) -> Array2<f64> {
    let mut axis = 0;
    while columns.len() < rank && axis < dim {
        let mut candidate = DVector::zeros(dim);
        candidate[axis] = 1.;
        axis += 1;
        for _ in 0..2 {
            for column in &columns {
                let overlap = column.dot(&candidate);
                candidate -= column * overlap;
            }
        }
        let norm = candidate.norm();
        if norm > 1e-6 {
            columns.push(candidate / norm);
        }
    }

    let mut factor = Array2::zeros((dim, rank));
    for (col, vector) in columns.iter().enumerate() {
        let pivot = (0..dim)
            .max_by(|&a, &b| {
                vector[a]
                    .abs()
                    .partial_cmp(&vector[b].abs())
                    .unwrap_or(Ordering::Equal)
            })
            .unwrap_or(0);
        let sign = if vector[pivot] < 0. { -1. } else { 1. };
        for row in 0..dim {
            factor[[row, col]] = sign * vector[row];
        }
    }
    factor
}

fn core_tensor(entries: &[([usize; 3], f64)], factors: &[Array2<f64>; 3]) -> Array3<f64> {
    let [u0, u1, u2] = factors;
    let (r0, r1, r2) = (u0.ncols(), u1.ncols(), u2.ncols());
    let mut core = Array3::zeros((r0, r1, r2));
    for (coord, value) in entries {
        for a in 0..r0 {
            let va = value * u0[[coord[0], a]];
            for b in 0..r1 {
                let vab = va * u1[[coord[1], b]];
                for c in 0..r2 {
                    core[[a, b, c]] += vab * u2[[coord[2], c]];
                }
            }
        }
    }
    core
}

/// With orthonormal factors `‖X - X̂‖² = ‖X‖² - ‖G‖²`.
fn relative_error(norm_sq: f64, core: &Array3<f64>) -> f64 {
    if norm_sq == 0. {
        return 0.;
    }
    let core_sq: f64 = core.iter().map(|g| g * g).sum();
    ((norm_sq - core_sq).max(0.) / norm_sq).sqrt()
}

fn validate(tensor: &SparseTensor3, options: &TuckerOptions) -> Result<(), DecompositionError> {
    for (mode, (&rank, &dim)) in options.rank.iter().zip(tensor.shape().iter()).enumerate() {
        if rank == 0 {
            return Err(DecompositionError::ZeroRank { mode });
        }
        if rank > dim {
            return Err(DecompositionError::RankExceedsDimension { mode, rank, dim });
        }
    }
    Ok(())
}

/// Rank-constrained Tucker decomposition of `tensor`.
pub fn tucker(
    tensor: &SparseTensor3,
    options: &TuckerOptions,
) -> Result<TuckerDecomposition, DecompositionError> {
    validate(tensor, options)?;
    let entries = tensor.canonical_entries();
    if let Some((coord, _)) = entries.iter().find(|(_, v)| !v.is_finite()) {
        return Err(DecompositionError::NonFinite { coord: *coord });
    }
    let shape = tensor.shape();
    let norm_sq: f64 = entries.iter().map(|(_, v)| v * v).sum();

    let mut factors: [Array2<f64>; 3] =
        [0, 1, 2].map(|mode| hosvd_factor(&entries, mode, shape[mode], options.rank[mode]));
    let mut core = core_tensor(&entries, &factors);
    let mut error = relative_error(norm_sq, &core);
    debug!(error, "HOSVD initialisation");

    let mut iterations = 0;
    while iterations < options.max_iter {
        for mode in 0..3 {
            factors[mode] = hooi_factor(&entries, mode, shape[mode], options.rank[mode], &factors);
        }
        core = core_tensor(&entries, &factors);
        let new_error = relative_error(norm_sq, &core);
        iterations += 1;
        let delta = (error - new_error).abs();
        error = new_error;
        debug!(iterations, error, "HOOI sweep");
        if delta < options.tol {
            break;
        }
    }
    info!(
        rank = ?options.rank,
        iterations,
        relative_error = error,
        "Tucker decomposition finished"
    );

    Ok(TuckerDecomposition {
        core,
        factors,
        iterations,
        relative_error: error,
    })
}
