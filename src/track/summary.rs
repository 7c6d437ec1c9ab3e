//! Headline parameter errors of a track at the origin.
use std::fmt;

use serde::Serialize;

use crate::constants::{GeV, Radian};

use super::{Propagation, Track};

/// Snapshot of the errors a detector study usually reports for one track.
///
/// A field is `None` when the corresponding quantity is not available (plane
/// underdetermined, no timing layers, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackErrors {
    pub theta: Radian,
    pub eta: f64,
    pub pt: GeV,
    pub n_hits: usize,
    pub n_active_hits: usize,
    pub delta_rho: Option<f64>,
    pub delta_phi0: Option<f64>,
    pub delta_d0: Option<f64>,
    pub delta_ctg_theta: Option<f64>,
    pub delta_z0: Option<f64>,
    pub delta_pt_over_pt: Option<f64>,
    pub delta_p_over_p: Option<f64>,
    pub delta_t0: Option<f64>,
    pub delta_ctau: Option<f64>,
}

impl Track {
    /// Collect the errors at the origin, propagating outside-in.
    ///
    /// Returns `None` when the kinematics were never set.
    pub fn summary(&mut self) -> Option<TrackErrors> {
        let kinematics = *self.kinematics()?;
        let dir = Propagation::OutsideIn;
        Some(TrackErrors {
            theta: kinematics.theta,
            eta: kinematics.eta,
            pt: kinematics.pt,
            n_hits: self.n_hits(),
            n_active_hits: self.n_active_hits("all", true),
            delta_rho: self.delta_rho(0.0, dir).ok(),
            delta_phi0: self.delta_phi0().ok(),
            delta_d0: self.delta_d0().ok(),
            delta_ctg_theta: self.delta_ctg_theta(0.0, dir).ok(),
            delta_z0: self.delta_z0().ok(),
            delta_pt_over_pt: self.delta_pt_over_pt(0.0, dir).ok(),
            delta_p_over_p: self.delta_p_over_p(0.0, dir).ok(),
            delta_t0: self.delta_t0().ok(),
            delta_ctau: self.delta_ctau().ok(),
        })
    }
}

struct Value(Option<f64>);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.6e}"),
            None => f.pad("n/a"),
        }
    }
}

impl fmt::Display for TrackErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "θ={:.5} η={:.4} pT={:.4} GeV, {} hits ({} active)",
            self.theta, self.eta, self.pt, self.n_hits, self.n_active_hits
        )?;
        let rows = [
            ("Δρ [1/mm]", self.delta_rho),
            ("Δφ0 [rad]", self.delta_phi0),
            ("Δd0 [mm]", self.delta_d0),
            ("Δcotθ", self.delta_ctg_theta),
            ("Δz0 [mm]", self.delta_z0),
            ("ΔpT/pT", self.delta_pt_over_pt),
            ("Δp/p", self.delta_p_over_p),
            ("Δt0 [ns]", self.delta_t0),
            ("Δcτ [mm]", self.delta_ctau),
        ];
        for (label, value) in rows {
            writeln!(f, "  {label:<10} {}", Value(value))?;
        }
        Ok(())
    }
}
