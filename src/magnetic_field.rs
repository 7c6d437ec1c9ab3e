//! # Magnetic field and trajectory radius model
//!
//! The track model assumes a solenoidal field depending on `z` only,
//! `B = B(z)·ẑ`, so transverse momentum is conserved along the path while the
//! local radius of curvature follows the field strength.
//!
//! A [`MagneticField`] is a piecewise-constant map over `|z|`:
//!
//! ```text
//! |z| ∈ [0, z_max_0)        → B_0
//! |z| ∈ [z_max_0, z_max_1)  → B_1
//! ...
//! |z| ≥ z_max_last          → 0
//! ```
//!
//! [`MagneticField::uniform`] builds the single unbounded region used for the
//! constant-field case.
//!
//! ## Connected parabolas
//!
//! In the R-Phi plane the trajectory is approximated by parabolic segments
//! whose curvature scales with the local field. With `ρ` the curvature at the
//! origin and `b(u) = B(z(u)) / B(z0)` the field normalised to the origin,
//!
//! ```text
//! φ(r) = φ0 + ρ · G(r),    G(r) = ∫₀ʳ b(u) du
//! f(r) = D0 + φ0 · r + ρ · F(r),    F(r) = ∫₀ʳ (r − u) b(u) du
//! ```
//!
//! [`MagneticField::path_integrals`] evaluates `G` and `F` exactly for the
//! piecewise-constant map. For a uniform field they reduce to `r` and `r²/2`.
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Millimeter, Tesla, DEFAULT_FIELD, K_FIELD, M_TO_MM},
    track_errors::TrackError,
};

/// One `|z|` band of constant field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRegion {
    /// Upper bound of the band in `|z|` (exclusive)
    pub z_max: Millimeter,
    /// Field strength inside the band
    pub field: Tesla,
}

/// Solenoidal field map `B = B(z)·ẑ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticField {
    regions: Vec<FieldRegion>,
}

/// Path integrals of the normalised field along the transverse path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathIntegrals {
    /// `∫₀ʳ b(u) du`, the derivative of the local direction with respect to curvature
    pub g: f64,
    /// `∫₀ʳ (r − u) b(u) du`, the derivative of the transverse offset with respect to curvature
    pub f: f64,
}

impl Default for MagneticField {
    fn default() -> Self {
        MagneticField::uniform(DEFAULT_FIELD)
    }
}

impl MagneticField {
    /// Constant field everywhere.
    pub fn uniform(field: Tesla) -> Self {
        MagneticField {
            regions: vec![FieldRegion {
                z_max: f64::INFINITY,
                field,
            }],
        }
    }

    /// Build a piecewise field map.
    ///
    /// Arguments
    /// -----------------
    /// * `regions`: bands ordered by strictly increasing, positive `z_max`.
    ///
    /// Return
    /// ----------
    /// * `Err(TrackError::InvalidFieldMap)` if the map is empty, unordered, or
    ///   carries a non-finite field value.
    pub fn from_regions(regions: Vec<FieldRegion>) -> Result<Self, TrackError> {
        if regions.is_empty() {
            return Err(TrackError::InvalidFieldMap(
                "at least one region is required".into(),
            ));
        }
        if regions.iter().any(|reg| !reg.field.is_finite()) {
            return Err(TrackError::InvalidFieldMap(
                "field values must be finite".into(),
            ));
        }
        if regions.iter().any(|reg| reg.z_max.is_nan() || reg.z_max <= 0.0) {
            return Err(TrackError::InvalidFieldMap(
                "region bounds must be positive".into(),
            ));
        }
        if regions
            .iter()
            .tuple_windows()
            .any(|(lo, hi)| hi.z_max <= lo.z_max)
        {
            return Err(TrackError::InvalidFieldMap(
                "region bounds must be strictly increasing".into(),
            ));
        }
        Ok(MagneticField { regions })
    }

    pub fn regions(&self) -> &[FieldRegion] {
        &self.regions
    }

    /// True when the field does not depend on `z`.
    pub fn is_uniform(&self) -> bool {
        self.regions.len() == 1 && self.regions[0].z_max == f64::INFINITY
    }

    /// Field strength at longitudinal position `z`.
    pub fn field_at(&self, z: Millimeter) -> Tesla {
        let abs_z = z.abs();
        self.regions
            .iter()
            .find(|reg| abs_z < reg.z_max)
            .map_or(0.0, |reg| reg.field)
    }

    /// Radius of curvature at `z` for transverse momentum `pt`.
    ///
    /// Returns `f64::INFINITY` where the field vanishes (straight track).
    pub fn radius_at(&self, z: Millimeter, pt: f64) -> Millimeter {
        let field = self.field_at(z);
        if field == 0.0 {
            return f64::INFINITY;
        }
        (pt / (K_FIELD * field)).abs() * M_TO_MM
    }

    /// Curvature `1/R` at `z`, zero for an infinite or undefined radius.
    pub fn rho_at(&self, z: Millimeter, pt: f64) -> f64 {
        let radius = self.radius_at(z, pt);
        if radius.is_finite() && radius > 0.0 {
            1.0 / radius
        } else {
            0.0
        }
    }

    /// `B(z) / B(z0)`, or 1 when there is no field at `z0`.
    pub fn relative_field(&self, z: Millimeter, z0: Millimeter) -> f64 {
        let reference = self.field_at(z0);
        if reference == 0.0 {
            1.0
        } else {
            self.field_at(z) / reference
        }
    }

    /// Evaluate `G(r)` and `F(r)` along the path `z(u) = z0 + u · cot θ`.
    ///
    /// The integration is exact for the piecewise-constant map: the path is
    /// split at every `|z|` boundary it crosses and each segment contributes
    /// analytically.
    pub fn path_integrals(&self, r: Millimeter, z0: Millimeter, cot_theta: f64) -> PathIntegrals {
        if r <= 0.0 {
            return PathIntegrals { g: 0.0, f: 0.0 };
        }
        if self.is_uniform() || self.field_at(z0) == 0.0 {
            return PathIntegrals {
                g: r,
                f: 0.5 * r * r,
            };
        }

        let mut breaks = vec![0.0, r];
        if cot_theta != 0.0 {
            for bound in self.regions.iter().map(|reg| reg.z_max) {
                if !bound.is_finite() {
                    continue;
                }
                for signed in [bound, -bound] {
                    let u = (signed - z0) / cot_theta;
                    if u > 0.0 && u < r {
                        breaks.push(u);
                    }
                }
            }
        }
        breaks.sort_by(f64::total_cmp);

        let (g, f) = breaks
            .iter()
            .tuple_windows()
            .fold((0.0, 0.0), |(g, f), (&lo, &hi)| {
                let rel = self.relative_field(z0 + 0.5 * (lo + hi) * cot_theta, z0);
                (
                    g + rel * (hi - lo),
                    f + rel * 0.5 * ((r - lo).powi(2) - (r - hi).powi(2)),
                )
            });
        PathIntegrals { g, f }
    }
}

/// Transverse arc length to radius `r` on a circle of radius `radius`.
///
/// Straight tracks (infinite radius) give `s = r`.
pub fn arc_length(r: Millimeter, radius: Millimeter) -> Millimeter {
    if !radius.is_finite() || radius <= 0.0 || r == 0.0 {
        return r;
    }
    let half_chord = (r / (2.0 * radius)).min(1.0);
    2.0 * radius * half_chord.asin()
}

/// `∂s/∂ρ` of the arc length `s = (2/ρ) asin(ρ r / 2)` at curvature `rho`.
pub fn arc_length_rho_derivative(r: Millimeter, rho: f64) -> f64 {
    let x = 0.5 * rho * r;
    if x.abs() < 1e-4 {
        // series: s ≈ r + ρ² r³ / 24
        return rho * r.powi(3) / 12.0;
    }
    let x = x.min(1.0 - f64::EPSILON);
    (r / rho) / (1.0 - x * x).sqrt() - 2.0 * x.asin() / (rho * rho)
}
