//! # Track aggregate
//!
//! A [`Track`] is a collection of consecutive hits used to estimate the
//! trajectory parameters and their covariance. Hits can be active (used in the
//! fit) or inactive (material only).
//!
//! ## Track model
//!
//! The field is assumed to depend on `z` only, `B = B(z)·ẑ`, and the helix is
//! replaced by two decoupled planar models:
//!
//! - **R-Phi**: connected parabolic segments, parameters `(1/R, φ0, D0)`,
//! - **s-Z**: a straight line in arc length, parameters `(cot θ, z0)`.
//!
//! Multiple Coulomb scattering on every crossed material layer correlates the
//! hit positions; the fit is a generalized least-squares solve with the full
//! correlated hit covariance. Which side of the reference point supplies the
//! hits and the scattering is chosen with [`Propagation`].
//!
//! ## Lazy evaluation
//!
//! Every getter may trigger work. The track walks a small state machine:
//!
//! ```text
//! Dirty ──curate──▶ Curated ──fit(ref_r, dir)──▶ Fitted
//!   ▲                                              │
//!   └────────────────── any mutator ───────────────┘
//! ```
//!
//! - *curate*: sort hits along the traversal direction and prune those beyond
//!   the curling radius,
//! - *fit*: solve the R-Phi and s-Z systems for one `(ref_r, direction)` key.
//!
//! A fitted state only answers for its own key; any mutation goes through
//! a single invalidation point, which drops everything back to `Dirty`.
//!
//! ## Example
//!
//! ```rust
//! use std::f64::consts::FRAC_PI_2;
//! use trackfit::hit::Hit;
//! use trackfit::track::{Propagation, Track};
//!
//! let mut track = Track::default();
//! track.set_theta_phi_pt(FRAC_PI_2, 0.0, 10.0, Propagation::InsideOut).unwrap();
//! track.add_ip_constraint(0.005, 0.005);
//! for r in [10.0, 20.0, 30.0, 40.0, 50.0] {
//!     track.add_hit(Hit::measurement(r, 0.0, 0.010, 0.010));
//! }
//! let d0 = track.delta_d0().unwrap();
//! assert!(d0 > 0.0 && d0 < 0.005);
//! ```
pub mod covariance;
pub mod curator;
pub mod propagator;
pub mod summary;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use nalgebra::{Matrix2, Matrix3, Matrix5, Vector3};
use tracing::trace;

use crate::{
    constants::{GeV, Millimeter, Radian, Tesla},
    fit_params::FitParams,
    hit::Hit,
    track_errors::TrackError,
};
use covariance::{DecoupledFit, FitModel};

/// Traversal or propagation direction along the radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// Increasing radius
    InsideOut,
    /// Decreasing radius
    OutsideIn,
}

impl Propagation {
    pub fn reversed(self) -> Self {
        match self {
            Propagation::InsideOut => Propagation::OutsideIn,
            Propagation::OutsideIn => Propagation::InsideOut,
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::InsideOut => write!(f, "inside-out"),
            Propagation::OutsideIn => write!(f, "outside-in"),
        }
    }
}

/// Direction and momentum of the track at the primary vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    pub theta: Radian,
    pub phi: Radian,
    /// Transverse momentum magnitude
    pub pt: GeV,
    /// Direction the particle traverses the detector
    pub direction: Propagation,
    pub cot_theta: f64,
    pub eta: f64,
    /// Total momentum
    pub p: GeV,
}

impl Kinematics {
    /// Validate the primary quantities and derive `cot θ`, `η` and `p`.
    pub fn new(theta: Radian, phi: Radian, pt: GeV, direction: Propagation) -> Result<Self, TrackError> {
        if !(theta > 0.0 && theta < std::f64::consts::PI) {
            return Err(TrackError::InvalidKinematics(format!(
                "theta must lie in (0, π), got {theta}"
            )));
        }
        if !phi.is_finite() {
            return Err(TrackError::InvalidKinematics(format!(
                "phi must be finite, got {phi}"
            )));
        }
        if !(pt > 0.0 && pt.is_finite()) {
            return Err(TrackError::InvalidKinematics(format!(
                "pt must be positive and finite, got {pt}"
            )));
        }
        let sin_theta = theta.sin();
        Ok(Kinematics {
            theta,
            phi,
            pt,
            direction,
            cot_theta: theta.cos() / sin_theta,
            eta: -(0.5 * theta).tan().ln(),
            p: pt / sin_theta,
        })
    }
}

/// Cache key: exact reference radius and propagation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FitKey {
    ref_r_bits: u64,
    direction: Propagation,
}

impl FitKey {
    fn new(ref_r: Millimeter, direction: Propagation) -> Self {
        FitKey {
            ref_r_bits: ref_r.to_bits(),
            direction,
        }
    }
}

#[derive(Debug, Clone)]
struct FitCache {
    key: FitKey,
    decoupled: DecoupledFit,
    full: Option<Result<Matrix5<f64>, TrackError>>,
}

#[derive(Debug, Clone)]
enum FitState {
    Dirty,
    Curated,
    Fitted(Box<FitCache>),
}

#[derive(Debug, Clone)]
pub struct Track {
    params: Arc<FitParams>,
    kinematics: Option<Kinematics>,
    origin: Vector3<f64>,
    hits: Vec<Hit>,
    time_hits: Vec<Hit>,
    tags: BTreeSet<String>,
    state: FitState,
}

impl Default for Track {
    fn default() -> Self {
        Track::new(Arc::new(FitParams::default()))
    }
}

impl Track {
    pub fn new(params: Arc<FitParams>) -> Self {
        Track {
            params,
            kinematics: None,
            origin: Vector3::zeros(),
            hits: Vec::new(),
            time_hits: Vec::new(),
            tags: BTreeSet::new(),
            state: FitState::Dirty,
        }
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    /// Set the direction and momentum at the primary vertex.
    ///
    /// Arguments
    /// -----------------
    /// * `theta`: polar angle in (0, π).
    /// * `phi`: azimuthal angle.
    /// * `pt`: transverse momentum magnitude (GeV).
    /// * `direction`: how the particle traverses the detector; it decides the
    ///   hit ordering.
    ///
    /// Return
    /// ----------
    /// * The derived [`Kinematics`], or `TrackError::InvalidKinematics`. On
    ///   error the track is left untouched.
    pub fn set_theta_phi_pt(
        &mut self,
        theta: Radian,
        phi: Radian,
        pt: GeV,
        direction: Propagation,
    ) -> Result<&Kinematics, TrackError> {
        let kinematics = Kinematics::new(theta, phi, pt, direction)?;
        self.invalidate();
        Ok(self.kinematics.insert(kinematics))
    }

    /// Change the transverse momentum (and possibly the traversal direction).
    ///
    /// Hits are resorted and pruned again on the next query: hits found in
    /// the high-pT limit may not lie on the new, more curved trajectory.
    pub fn reset_pt(&mut self, pt: GeV, direction: Propagation) -> Result<(), TrackError> {
        let current = self.kinematics.ok_or(TrackError::UnsetKinematics)?;
        self.set_theta_phi_pt(current.theta, current.phi, pt, direction)?;
        Ok(())
    }

    pub fn set_origin(&mut self, x: Millimeter, y: Millimeter, z: Millimeter) -> &Vector3<f64> {
        self.origin = Vector3::new(x, y, z);
        self.invalidate();
        &self.origin
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    pub fn kinematics(&self) -> Option<&Kinematics> {
        self.kinematics.as_ref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Field at `z`, assuming `B = B(z)·ẑ`.
    pub fn mag_field(&self, z: Millimeter) -> Tesla {
        self.params.field.field_at(z)
    }

    /// Radius of curvature at `z`.
    pub fn radius(&self, z: Millimeter) -> Result<Millimeter, TrackError> {
        let kin = self.require_kinematics()?;
        Ok(self.params.field.radius_at(z, kin.pt))
    }

    /// Curvature `1/R` at `z`, zero for a straight track.
    pub fn rho(&self, z: Millimeter) -> Result<f64, TrackError> {
        let kin = self.require_kinematics()?;
        Ok(self.params.field.rho_at(z, kin.pt))
    }

    /// Nominal 3×3 R-Phi covariance `(1/R, φ0, D0)` at [0,0] for this key.
    pub fn covariance_rphi(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<Matrix3<f64>, TrackError> {
        self.decoupled_fit(ref_r, direction)?.rphi
    }

    /// Nominal 2×2 s-Z covariance `(cot θ, z0)` at [0,0] for this key.
    pub fn covariance_sz(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<Matrix2<f64>, TrackError> {
        self.decoupled_fit(ref_r, direction)?.sz
    }

    /// Nominal joint 5×5 covariance `(1/R, φ0, D0, cot θ, z0)` at [0,0].
    pub fn covariance_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<Matrix5<f64>, TrackError> {
        self.full_fit(ref_r, direction)
    }

    /// Single invalidation point: every mutator ends up here.
    pub(crate) fn invalidate(&mut self) {
        if !matches!(self.state, FitState::Dirty) {
            trace!("track caches invalidated");
        }
        self.state = FitState::Dirty;
    }

    fn require_kinematics(&self) -> Result<Kinematics, TrackError> {
        self.kinematics.ok_or(TrackError::UnsetKinematics)
    }

    fn model(&self, kinematics: Kinematics) -> FitModel<'_> {
        FitModel::new(&self.params.field, kinematics, self.origin.z)
    }

    /// Bring hits into traversal order and drop those beyond the curling radius.
    fn curate(&mut self) {
        if !matches!(self.state, FitState::Dirty) {
            return;
        }
        let by_smaller_r = self
            .kinematics
            .map_or(true, |kin| kin.direction == Propagation::InsideOut);
        self.sort_hits(by_smaller_r);
        self.prune();
        trace!(n_hits = self.hits.len(), "hits curated");
        self.state = FitState::Curated;
    }

    fn cached(&self, key: FitKey) -> Option<&FitCache> {
        match &self.state {
            FitState::Fitted(cache) if cache.key == key => Some(cache),
            _ => None,
        }
    }

    /// Decoupled R-Phi / s-Z fit for the key, computed at most once per key.
    fn decoupled_fit(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<DecoupledFit, TrackError> {
        let kinematics = self.require_kinematics()?;
        self.curate();

        let key = FitKey::new(ref_r, direction);
        if let Some(cache) = self.cached(key) {
            return Ok(cache.decoupled.clone());
        }

        trace!(ref_r, %direction, "computing covariance matrices");
        let decoupled = covariance::fit_decoupled(&self.model(kinematics), &self.hits, ref_r, direction);
        self.state = FitState::Fitted(Box::new(FitCache {
            key,
            decoupled: decoupled.clone(),
            full: None,
        }));
        Ok(decoupled)
    }

    /// Joint 5×5 fit, attached lazily to the cache of the same key.
    fn full_fit(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<Matrix5<f64>, TrackError> {
        self.decoupled_fit(ref_r, direction)?;
        if let FitState::Fitted(cache) = &self.state {
            if let Some(full) = &cache.full {
                return full.clone();
            }
        }

        let kinematics = self.require_kinematics()?;
        trace!(ref_r, %direction, "computing full covariance matrix");
        let full = covariance::fit_full(&self.model(kinematics), &self.hits, ref_r, direction);
        if let FitState::Fitted(cache) = &mut self.state {
            cache.full = Some(full.clone());
        }
        full
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kinematics {
            Some(kin) => writeln!(
                f,
                "Track: θ={:.5} φ={:.5} η={:.4} pT={:.4} GeV ({})",
                kin.theta, kin.phi, kin.eta, kin.pt, kin.direction
            )?,
            None => writeln!(f, "Track: kinematics not set")?,
        }
        writeln!(
            f,
            "origin=[{:.3}, {:.3}, {:.3}] mm, {} position hits, {} time hits",
            self.origin.x,
            self.origin.y,
            self.origin.z,
            self.hits.len(),
            self.time_hits.len()
        )?;
        for (i, hit) in self.hits.iter().chain(&self.time_hits).enumerate() {
            writeln!(f, "  #{i:<3} {hit}")?;
        }
        Ok(())
    }
}
