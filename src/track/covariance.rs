//! # Covariance fit engine
//!
//! Builds and solves the weighted normal equations of the track model at the
//! nominal reference point [0,0].
//!
//! ## Measurement model
//!
//! | Plane | Model | Design row | Parameters |
//! |-------|-------|------------|------------|
//! | R-Phi | `f(r) = D0 + φ0·r + ρ·F(r)` | `[F(r), r, 1]` | `(1/R, φ0, D0)` |
//! | s-Z   | `z(s) = z0 + cot θ·s`       | `[s, 1]`       | `(cot θ, z0)`  |
//!
//! `F` is the connected-parabola integral of
//! [`MagneticField::path_integrals`], `s` the transverse arc length.
//!
//! ## Hit covariance
//!
//! Each active hit contributes its own resolution on the diagonal. Every
//! material layer `k` between the reference point and two hits `i`, `j`
//! scatters the track by an angle of variance `θ0_k²` and displaces both hits
//! proportionally to their distance from the layer:
//!
//! ```text
//! V_ij = δ_ij σ_i² + Σ_k (c_i − c_k)(c_j − c_k) θ0_k² · P
//! ```
//!
//! with `c` the plane coordinate (`r` in R-Phi, `s` in s-Z) and the projection
//! factor `P = 1 + cot²θ` in R-Phi and `(1 + cot²θ)²` in s-Z.
//!
//! Propagating outside-in, hits at `r ≥ ref_r` are fitted and the layers in
//! `[ref_r, min(r_i, r_j))` scatter; inside-out, hits at `r ≤ ref_r` are fitted
//! and the layers in `(max(r_i, r_j), ref_r]` scatter.
//!
//! ## Joint 5×5 formulation
//!
//! [`fit_full`] stacks both planes in one system and keeps the dependence of
//! the arc length on curvature, `∂z/∂ρ = cot θ · ∂s/∂ρ`, which the decoupled
//! fit neglects. It serves as a cross-check of the decoupled result.
use itertools::Itertools;
use nalgebra::{DMatrix, Matrix2, Matrix3, Matrix5};
use tracing::debug;

use crate::{
    constants::Millimeter,
    hit::Hit,
    linalg::{gls_covariance, to_fixed},
    magnetic_field::{arc_length, arc_length_rho_derivative, MagneticField, PathIntegrals},
    track_errors::{FitPlane, TrackError},
};

use super::{Kinematics, Propagation};

const RPHI_PARAMS: usize = 3;
const SZ_PARAMS: usize = 2;

/// Outcome of the decoupled fit; each plane may fail on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoupledFit {
    pub rphi: Result<Matrix3<f64>, TrackError>,
    pub sz: Result<Matrix2<f64>, TrackError>,
}

/// Trajectory geometry seen by the fit for one track.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FitModel<'a> {
    field: &'a MagneticField,
    kinematics: Kinematics,
    origin_z: Millimeter,
}

impl<'a> FitModel<'a> {
    pub(crate) fn new(field: &'a MagneticField, kinematics: Kinematics, origin_z: Millimeter) -> Self {
        FitModel {
            field,
            kinematics,
            origin_z,
        }
    }

    pub(crate) fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    /// `z` of the trajectory when it reaches radius `r`.
    pub(crate) fn trajectory_z(&self, r: Millimeter) -> Millimeter {
        self.origin_z + r * self.kinematics.cot_theta
    }

    /// Curvature at the origin.
    pub(crate) fn rho(&self) -> f64 {
        self.field.rho_at(self.origin_z, self.kinematics.pt)
    }

    /// Field at radius `r` relative to the origin.
    pub(crate) fn relative_field(&self, r: Millimeter) -> f64 {
        self.field
            .relative_field(self.trajectory_z(r), self.origin_z)
    }

    pub(crate) fn integrals(&self, r: Millimeter) -> PathIntegrals {
        self.field
            .path_integrals(r, self.origin_z, self.kinematics.cot_theta)
    }

    pub(crate) fn arc_length(&self, r: Millimeter) -> Millimeter {
        let radius = self
            .field
            .radius_at(self.trajectory_z(r), self.kinematics.pt);
        arc_length(r, radius)
    }

    /// `∂z/∂ρ` at radius `r`, through the curvature dependence of the arc length.
    pub(crate) fn z_rho_derivative(&self, r: Millimeter) -> f64 {
        let rho = self
            .field
            .rho_at(self.trajectory_z(r), self.kinematics.pt);
        self.kinematics.cot_theta * arc_length_rho_derivative(r, rho)
    }

    fn cot2(&self) -> f64 {
        self.kinematics.cot_theta * self.kinematics.cot_theta
    }
}

/// Part of the detector a fit for `(ref_r, direction)` looks at.
#[derive(Debug, Clone, Copy)]
struct ScatterWindow {
    ref_r: Millimeter,
    direction: Propagation,
}

impl ScatterWindow {
    /// Hit at radius `r` lies on the propagated side of the reference point.
    fn contains(&self, r: Millimeter) -> bool {
        match self.direction {
            Propagation::OutsideIn => r >= self.ref_r,
            Propagation::InsideOut => r <= self.ref_r,
        }
    }

    /// Layer at `r_k` deflects the track before it reaches both `r_i` and `r_j`.
    fn upstream(&self, r_k: Millimeter, r_i: Millimeter, r_j: Millimeter) -> bool {
        match self.direction {
            Propagation::OutsideIn => r_k >= self.ref_r && r_k < r_i.min(r_j),
            Propagation::InsideOut => r_k <= self.ref_r && r_k > r_i.max(r_j),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    r: Millimeter,
    coord: Millimeter,
    sigma: Millimeter,
}

#[derive(Debug, Clone, Copy)]
struct Scatterer {
    r: Millimeter,
    coord: Millimeter,
    variance: f64,
}

/// Resolution plus correlated scattering covariance of the measurements.
fn hit_covariance(
    measurements: &[Measurement],
    scatterers: &[Scatterer],
    window: ScatterWindow,
    projection: f64,
) -> DMatrix<f64> {
    let n = measurements.len();
    DMatrix::from_fn(n, n, |i, j| {
        let (a, b) = (&measurements[i], &measurements[j]);
        let scattering: f64 = scatterers
            .iter()
            .filter(|k| window.upstream(k.r, a.r, b.r))
            .map(|k| (a.coord - k.coord) * (b.coord - k.coord) * k.variance)
            .sum();
        let resolution = if i == j { a.sigma * a.sigma } else { 0.0 };
        resolution + projection * scattering
    })
}

/// Measurements and scatterers of both planes for one fit key.
struct FitInputs {
    rphi: Vec<Measurement>,
    sz: Vec<Measurement>,
    rphi_scatterers: Vec<Scatterer>,
    sz_scatterers: Vec<Scatterer>,
    window: ScatterWindow,
}

impl FitInputs {
    fn collect(model: &FitModel, hits: &[Hit], ref_r: Millimeter, direction: Propagation) -> Self {
        let window = ScatterWindow { ref_r, direction };
        let kin = model.kinematics();

        let fitted: Vec<&Hit> = hits
            .iter()
            .filter(|hit| hit.active && window.contains(hit.r))
            .collect();
        let rphi = fitted
            .iter()
            .map(|hit| Measurement {
                r: hit.r,
                coord: hit.r,
                sigma: hit.resolution_rphi,
            })
            .collect();
        let sz = fitted
            .iter()
            .map(|hit| Measurement {
                r: hit.r,
                coord: model.arc_length(hit.r),
                sigma: hit.effective_resolution_z(kin.cot_theta),
            })
            .collect();

        let (rphi_scatterers, sz_scatterers): (Vec<_>, Vec<_>) = hits
            .iter()
            .filter(|hit| window.contains(hit.r))
            .filter_map(|hit| {
                let variance = hit.ms_variance(kin.p);
                (variance > 0.0).then(|| {
                    (
                        Scatterer {
                            r: hit.r,
                            coord: hit.r,
                            variance,
                        },
                        Scatterer {
                            r: hit.r,
                            coord: model.arc_length(hit.r),
                            variance,
                        },
                    )
                })
            })
            .unzip();

        FitInputs {
            rphi,
            sz,
            rphi_scatterers,
            sz_scatterers,
            window,
        }
    }

    fn rphi_covariance(&self, model: &FitModel) -> DMatrix<f64> {
        hit_covariance(
            &self.rphi,
            &self.rphi_scatterers,
            self.window,
            1.0 + model.cot2(),
        )
    }

    fn sz_covariance(&self, model: &FitModel) -> DMatrix<f64> {
        let projection = 1.0 + model.cot2();
        hit_covariance(
            &self.sz,
            &self.sz_scatterers,
            self.window,
            projection * projection,
        )
    }
}

/// Check that enough hits at distinct positions take part in a plane fit.
fn require_hits(plane: FitPlane, measurements: &[Measurement], required: usize) -> Result<(), TrackError> {
    let used = measurements
        .iter()
        .map(|meas| meas.coord)
        .sorted_by(f64::total_cmp)
        .dedup()
        .count();
    if used < required {
        debug!(%plane, used, required, "fit underdetermined");
        return Err(TrackError::Underdetermined {
            plane,
            used,
            required,
        });
    }
    Ok(())
}

fn solve(
    plane: FitPlane,
    design: &DMatrix<f64>,
    variance: DMatrix<f64>,
) -> Result<DMatrix<f64>, TrackError> {
    gls_covariance(design, variance).ok_or_else(|| {
        debug!(%plane, rows = design.nrows(), "normal equations not invertible");
        TrackError::SingularSystem(plane)
    })
}

fn fit_rphi(model: &FitModel, inputs: &FitInputs) -> Result<Matrix3<f64>, TrackError> {
    require_hits(FitPlane::RPhi, &inputs.rphi, RPHI_PARAMS)?;
    let design = DMatrix::from_fn(inputs.rphi.len(), RPHI_PARAMS, |i, j| {
        let r = inputs.rphi[i].r;
        match j {
            0 => model.integrals(r).f,
            1 => r,
            _ => 1.0,
        }
    });
    let covariance = solve(FitPlane::RPhi, &design, inputs.rphi_covariance(model))?;
    Ok(to_fixed::<3>(&covariance))
}

fn fit_sz(model: &FitModel, inputs: &FitInputs) -> Result<Matrix2<f64>, TrackError> {
    require_hits(FitPlane::SZ, &inputs.sz, SZ_PARAMS)?;
    let design = DMatrix::from_fn(inputs.sz.len(), SZ_PARAMS, |i, j| match j {
        0 => inputs.sz[i].coord,
        _ => 1.0,
    });
    let covariance = solve(FitPlane::SZ, &design, inputs.sz_covariance(model))?;
    Ok(to_fixed::<2>(&covariance))
}

/// Decoupled 3×3 R-Phi and 2×2 s-Z covariance at [0,0].
///
/// Arguments
/// -----------------
/// * `model`: trajectory geometry of the track.
/// * `hits`: curated position hits (sorted, pruned).
/// * `ref_r`: reference radius the errors will be propagated to.
/// * `direction`: side of the reference point used for the fit.
///
/// Return
/// ----------
/// * A [`DecoupledFit`]; a plane with too few active hits reports
///   `TrackError::Underdetermined`, a degenerate one `TrackError::SingularSystem`.
pub(crate) fn fit_decoupled(
    model: &FitModel,
    hits: &[Hit],
    ref_r: Millimeter,
    direction: Propagation,
) -> DecoupledFit {
    let inputs = FitInputs::collect(model, hits, ref_r, direction);
    DecoupledFit {
        rphi: fit_rphi(model, &inputs),
        sz: fit_sz(model, &inputs),
    }
}

/// Joint 5×5 covariance `(1/R, φ0, D0, cot θ, z0)` at [0,0].
pub(crate) fn fit_full(
    model: &FitModel,
    hits: &[Hit],
    ref_r: Millimeter,
    direction: Propagation,
) -> Result<Matrix5<f64>, TrackError> {
    let inputs = FitInputs::collect(model, hits, ref_r, direction);
    let n_rphi = inputs.rphi.len();
    let n_sz = inputs.sz.len();
    require_hits(FitPlane::RPhi, &inputs.rphi, RPHI_PARAMS)?;
    require_hits(FitPlane::SZ, &inputs.sz, SZ_PARAMS)?;

    let n = n_rphi + n_sz;
    let mut design = DMatrix::zeros(n, RPHI_PARAMS + SZ_PARAMS);
    for (i, meas) in inputs.rphi.iter().enumerate() {
        design[(i, 0)] = model.integrals(meas.r).f;
        design[(i, 1)] = meas.r;
        design[(i, 2)] = 1.0;
    }
    for (i, meas) in inputs.sz.iter().enumerate() {
        let row = n_rphi + i;
        design[(row, 0)] = model.z_rho_derivative(meas.r);
        design[(row, 3)] = meas.coord;
        design[(row, 4)] = 1.0;
    }

    let mut variance = DMatrix::zeros(n, n);
    variance
        .view_mut((0, 0), (n_rphi, n_rphi))
        .copy_from(&inputs.rphi_covariance(model));
    variance
        .view_mut((n_rphi, n_rphi), (n_sz, n_sz))
        .copy_from(&inputs.sz_covariance(model));

    let covariance = solve(FitPlane::Full, &design, variance)?;
    Ok(to_fixed::<5>(&covariance))
}
