//! # Reference-point propagator
//!
//! The fit engine produces covariances at the nominal reference point [0,0].
//! The accessors below transport them to an arbitrary reference radius
//! `ref_r` (with `z_ref = z_origin + ref_r · cot θ`) using the Jacobian of the
//! track model:
//!
//! ```text
//! ρ_ref   = b(ref_r) · ρ
//! φ_ref   = φ0 + G(ref_r) · ρ
//! D_ref   = D0 + ref_r · φ0 + F(ref_r) · ρ
//! cot_ref = cot θ
//! z_ref   = z0 + s(ref_r) · cot θ
//! ```
//!
//! `b` is the field relative to the origin and `G`, `F` the connected-parabola
//! integrals. At `ref_r = 0` the nominal matrix is used as is, so the errors
//! are exactly the square roots of its diagonal.
//!
//! The [`Propagation`] argument picks which side of the reference point
//! feeds the fit: `OutsideIn` uses the layers at larger radius (the usual
//! choice for impact parameters at the vertex), `InsideOut` those at smaller
//! radius.
//!
//! Every accessor returns a [`TrackError`] rather than a number when the fit
//! for that plane failed or the kinematics were never set.
use std::f64::consts::SQRT_2;

use nalgebra::{Matrix2, Matrix3, Matrix5};
use tracing::debug;

use crate::{
    constants::{Millimeter, C_MM_PER_NS},
    linalg::{propagate, sigmas},
    track_errors::{FitPlane, TrackError},
};

use super::{covariance::FitModel, Propagation, Track};

impl FitModel<'_> {
    fn rphi_jacobian(&self, ref_r: Millimeter) -> Matrix3<f64> {
        let integrals = self.integrals(ref_r);
        Matrix3::new(
            self.relative_field(ref_r), 0.0, 0.0, //
            integrals.g, 1.0, 0.0, //
            integrals.f, ref_r, 1.0,
        )
    }

    fn sz_jacobian(&self, ref_r: Millimeter) -> Matrix2<f64> {
        Matrix2::new(
            1.0, 0.0, //
            self.arc_length(ref_r), 1.0,
        )
    }

    fn full_jacobian(&self, ref_r: Millimeter) -> Matrix5<f64> {
        let mut jacobian = Matrix5::zeros();
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rphi_jacobian(ref_r));
        jacobian
            .fixed_view_mut::<2, 2>(3, 3)
            .copy_from(&self.sz_jacobian(ref_r));
        jacobian[(4, 0)] = self.z_rho_derivative(ref_r);
        jacobian
    }

    /// Curvature at the reference radius.
    fn rho_at_ref(&self, ref_r: Millimeter) -> Result<f64, TrackError> {
        let rho = self.rho() * self.relative_field(ref_r);
        if rho == 0.0 {
            return Err(TrackError::UndefinedCurvature);
        }
        Ok(rho)
    }
}

impl Track {
    /// Errors on `(1/R, φ, D)` at the reference radius.
    pub fn rphi_errors(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<[f64; 3], TrackError> {
        let covariance = self.covariance_rphi(ref_r, direction)?;
        let propagated = if ref_r == 0.0 {
            covariance
        } else {
            let model = self.model(self.require_kinematics()?);
            propagate(&model.rphi_jacobian(ref_r), &covariance)
        };
        sigmas(&propagated).ok_or(TrackError::NegativeVariance(FitPlane::RPhi))
    }

    /// Errors on `(cot θ, z)` at the reference radius.
    pub fn sz_errors(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<[f64; 2], TrackError> {
        let covariance = self.covariance_sz(ref_r, direction)?;
        let propagated = if ref_r == 0.0 {
            covariance
        } else {
            let model = self.model(self.require_kinematics()?);
            propagate(&model.sz_jacobian(ref_r), &covariance)
        };
        sigmas(&propagated).ok_or(TrackError::NegativeVariance(FitPlane::SZ))
    }

    /// Errors on `(1/R, φ, D, cot θ, z)` from the joint 5×5 matrix.
    pub fn full_errors(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<[f64; 5], TrackError> {
        let covariance = self.covariance_full(ref_r, direction)?;
        let propagated = if ref_r == 0.0 {
            covariance
        } else {
            let model = self.model(self.require_kinematics()?);
            propagate(&model.full_jacobian(ref_r), &covariance)
        };
        sigmas(&propagated).ok_or(TrackError::NegativeVariance(FitPlane::Full))
    }

    /// Error on the curvature `1/R` at the reference radius.
    pub fn delta_rho(&mut self, ref_r: Millimeter, direction: Propagation) -> Result<f64, TrackError> {
        Ok(self.rphi_errors(ref_r, direction)?[0])
    }

    /// Error on the azimuth `φ` at the reference radius.
    pub fn delta_phi(&mut self, ref_r: Millimeter, direction: Propagation) -> Result<f64, TrackError> {
        Ok(self.rphi_errors(ref_r, direction)?[1])
    }

    pub fn delta_phi0(&mut self) -> Result<f64, TrackError> {
        self.delta_phi(0.0, Propagation::OutsideIn)
    }

    /// Error on the transverse impact parameter at the reference radius.
    pub fn delta_d(&mut self, ref_r: Millimeter, direction: Propagation) -> Result<f64, TrackError> {
        Ok(self.rphi_errors(ref_r, direction)?[2])
    }

    pub fn delta_d0(&mut self) -> Result<f64, TrackError> {
        self.delta_d(0.0, Propagation::OutsideIn)
    }

    pub fn delta_ctg_theta(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.sz_errors(ref_r, direction)?[0])
    }

    /// Error on the longitudinal impact parameter at the reference radius.
    pub fn delta_z(&mut self, ref_r: Millimeter, direction: Propagation) -> Result<f64, TrackError> {
        Ok(self.sz_errors(ref_r, direction)?[1])
    }

    pub fn delta_z0(&mut self) -> Result<f64, TrackError> {
        self.delta_z(0.0, Propagation::OutsideIn)
    }

    /// Relative transverse momentum error, `Δρ / ρ` at the reference radius.
    pub fn delta_pt_over_pt(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        let delta_rho = self.delta_rho(ref_r, direction)?;
        let rho = self.model(self.require_kinematics()?).rho_at_ref(ref_r)?;
        Ok(delta_rho / rho)
    }

    /// Relative momentum error through `p = pT / sin θ`.
    ///
    /// Combines `ΔpT/pT` with the polar-angle term
    /// `cot θ · Δcot θ / (1 + cot²θ)`, neglecting their correlation (the
    /// planes are fitted independently).
    pub fn delta_p_over_p(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        let delta_pt_over_pt = self.delta_pt_over_pt(ref_r, direction)?;
        let delta_ctg_theta = self.delta_ctg_theta(ref_r, direction)?;
        let cot = self.require_kinematics()?.cot_theta;
        let polar = cot * delta_ctg_theta / (1.0 + cot * cot);
        Ok(delta_pt_over_pt.hypot(polar))
    }

    pub fn delta_rho_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.full_errors(ref_r, direction)?[0])
    }

    pub fn delta_phi_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.full_errors(ref_r, direction)?[1])
    }

    pub fn delta_d_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.full_errors(ref_r, direction)?[2])
    }

    pub fn delta_ctg_theta_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.full_errors(ref_r, direction)?[3])
    }

    pub fn delta_z_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        Ok(self.full_errors(ref_r, direction)?[4])
    }

    pub fn delta_pt_over_pt_full(
        &mut self,
        ref_r: Millimeter,
        direction: Propagation,
    ) -> Result<f64, TrackError> {
        let delta_rho = self.delta_rho_full(ref_r, direction)?;
        let rho = self.model(self.require_kinematics()?).rho_at_ref(ref_r)?;
        Ok(delta_rho / rho)
    }

    /// Time resolution at the reference radius from all active time hits.
    ///
    /// Each time layer measures the crossing time at its own radius; moving it
    /// to the reference point adds the time of flight over the path `L`
    /// between both. With a massive hypothesis the velocity, and hence the
    /// correction, inherits the momentum error:
    ///
    /// ```text
    /// σ_tof = L / c · (m²/p²) / sqrt(1 + m²/p²) · Δp/p
    /// ΔT    = (Σ 1 / (σ_t² + σ_tof²))^(-1/2)
    /// ```
    ///
    /// The correction only applies while `ref_r` lies within the radial span
    /// of the timing layers. Outside it, without a usable momentum error or for
    /// a massless hypothesis, this is the plain combination of the time
    /// resolutions.
    pub fn delta_t(&mut self, ref_r: Millimeter) -> Result<f64, TrackError> {
        let kinematics = self.require_kinematics()?;
        self.curate();

        let layers: Vec<(Millimeter, f64)> = self
            .time_hits
            .iter()
            .filter(|hit| hit.active && hit.resolution_t > 0.0)
            .map(|hit| (hit.r, hit.resolution_t))
            .collect();
        if layers.is_empty() {
            return Err(TrackError::NoTimeHits);
        }

        let (r_min, r_max) = layers
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(r, _)| {
                (lo.min(r), hi.max(r))
            });
        let mass = self.params.particle_mass;
        let tof_scale = if mass > 0.0 && (r_min..=r_max).contains(&ref_r) {
            match self.delta_p_over_p(0.0, Propagation::OutsideIn) {
                Ok(delta_p_over_p) => {
                    let ratio = (mass / kinematics.p).powi(2);
                    ratio / (1.0 + ratio).sqrt() * delta_p_over_p / C_MM_PER_NS
                }
                Err(err) => {
                    debug!(%err, "no momentum error, time-of-flight correction skipped");
                    0.0
                }
            }
        } else {
            0.0
        };

        let model = self.model(kinematics);
        let path_per_arc = (1.0 + kinematics.cot_theta.powi(2)).sqrt();
        let s_ref = model.arc_length(ref_r);
        let weight: f64 = layers
            .iter()
            .map(|&(r, sigma)| {
                let path = (model.arc_length(r) - s_ref).abs() * path_per_arc;
                let tof = path * tof_scale;
                1.0 / (sigma * sigma + tof * tof)
            })
            .sum();
        Ok(1.0 / weight.sqrt())
    }

    pub fn delta_t0(&mut self) -> Result<f64, TrackError> {
        self.delta_t(0.0)
    }

    /// Decay-length resolution for secondaries produced near the origin.
    ///
    /// Combines the transverse and the longitudinal impact-parameter errors
    /// (the latter projected perpendicular to the track, `Δz0 · sin θ`) into
    /// the error on the point of closest approach, scaled by `√2` for a
    /// two-track vertex.
    pub fn delta_ctau(&mut self) -> Result<f64, TrackError> {
        let delta_d0 = self.delta_d0()?;
        let delta_z0 = self.delta_z0()?;
        let sin_theta = self.require_kinematics()?.theta.sin();
        let z_perp = delta_z0 * sin_theta;
        let norm = delta_d0.hypot(z_perp);
        if norm == 0.0 {
            return Ok(0.0);
        }
        Ok(SQRT_2 * delta_d0 * z_perp / norm)
    }
}

#[cfg(test)]
mod propagator_test {
    use super::*;
    use crate::{fit_params::FitParams, hit::Hit, hit::Material};
    use approx::assert_relative_eq;
    use std::{f64::consts::FRAC_PI_2, sync::Arc};

    fn track(theta: f64, pt: f64, radii: &[f64], material: f64) -> Track {
        let mut track = Track::default();
        track
            .set_theta_phi_pt(theta, 0.0, pt, Propagation::InsideOut)
            .unwrap();
        track.add_ip_constraint(0.005, 0.005);
        let cot = theta.cos() / theta.sin();
        for &r in radii {
            track.add_hit(
                Hit::measurement(r, r * cot, 0.010, 0.010).with_material(Material::new(material, 0.0)),
            );
        }
        track
    }

    #[test]
    fn test_reference_origin_is_nominal_diagonal() {
        let mut t = track(1.2, 3.0, &[30.0, 60.0, 90.0, 120.0], 0.01);
        let rphi = t.covariance_rphi(0.0, Propagation::OutsideIn).unwrap();
        let sz = t.covariance_sz(0.0, Propagation::OutsideIn).unwrap();
        assert_eq!(t.delta_rho(0.0, Propagation::OutsideIn).unwrap(), rphi[(0, 0)].sqrt());
        assert_eq!(t.delta_phi0().unwrap(), rphi[(1, 1)].sqrt());
        assert_eq!(t.delta_d0().unwrap(), rphi[(2, 2)].sqrt());
        assert_eq!(
            t.delta_ctg_theta(0.0, Propagation::OutsideIn).unwrap(),
            sz[(0, 0)].sqrt()
        );
        assert_eq!(t.delta_z0().unwrap(), sz[(1, 1)].sqrt());
    }

    #[test]
    fn test_curvature_error_is_position_independent_in_uniform_field() {
        let mut t = track(FRAC_PI_2, 5.0, &[30.0, 60.0, 90.0, 120.0, 150.0], 0.0);
        // uniform field: b = 1, G = r, F = r²/2
        let cov = t.covariance_rphi(0.0, Propagation::OutsideIn).unwrap();
        let model = t.model(*t.kinematics().unwrap());
        let moved = propagate(&model.rphi_jacobian(45.0), &cov);
        assert_relative_eq!(moved[(0, 0)], cov[(0, 0)]);
        let expected_d = cov[(2, 2)]
            + 45.0 * 45.0 * cov[(1, 1)]
            + (0.5 * 45.0 * 45.0_f64).powi(2) * cov[(0, 0)]
            + 2.0 * 45.0 * cov[(1, 2)]
            + 2.0 * 0.5 * 45.0 * 45.0 * cov[(0, 2)]
            + 2.0 * 45.0 * 0.5 * 45.0 * 45.0 * cov[(0, 1)];
        assert_relative_eq!(moved[(2, 2)], expected_d, max_relative = 1e-9);
    }

    #[test]
    fn test_pt_and_p_resolution() {
        let mut t = track(1.0, 2.0, &[30.0, 60.0, 90.0, 120.0, 150.0], 0.01);
        let delta_rho = t.delta_rho(0.0, Propagation::OutsideIn).unwrap();
        let rho = t.rho(0.0).unwrap();
        let dpt = t.delta_pt_over_pt(0.0, Propagation::OutsideIn).unwrap();
        assert_relative_eq!(dpt, delta_rho / rho);

        let dcot = t.delta_ctg_theta(0.0, Propagation::OutsideIn).unwrap();
        let cot = t.kinematics().unwrap().cot_theta;
        let dp = t.delta_p_over_p(0.0, Propagation::OutsideIn).unwrap();
        assert_relative_eq!(
            dp,
            (dpt * dpt + (cot * dcot / (1.0 + cot * cot)).powi(2)).sqrt(),
            max_relative = 1e-14
        );
        assert!(dp >= dpt);
    }

    #[test]
    fn test_zero_field_has_undefined_curvature() {
        let params = FitParams::builder()
            .field(crate::magnetic_field::MagneticField::uniform(0.0))
            .build()
            .unwrap();
        let mut t = Track::new(Arc::new(params));
        t.set_theta_phi_pt(FRAC_PI_2, 0.0, 1.0, Propagation::InsideOut)
            .unwrap();
        for r in [30.0, 60.0, 90.0, 120.0] {
            t.add_hit(Hit::measurement(r, 0.0, 0.01, 0.01));
        }
        assert!(t.delta_d0().is_ok());
        assert_eq!(
            t.delta_pt_over_pt(0.0, Propagation::OutsideIn),
            Err(TrackError::UndefinedCurvature)
        );
    }

    #[test]
    fn test_full_variants_agree_with_decoupled() {
        let mut t = track(1.1, 4.0, &[30.0, 60.0, 90.0, 120.0, 150.0], 0.01);
        let ref_r = 0.0;
        let pairs = [
            (
                t.delta_rho(ref_r, Propagation::OutsideIn).unwrap(),
                t.delta_rho_full(ref_r, Propagation::OutsideIn).unwrap(),
            ),
            (
                t.delta_d(ref_r, Propagation::OutsideIn).unwrap(),
                t.delta_d_full(ref_r, Propagation::OutsideIn).unwrap(),
            ),
            (
                t.delta_phi(ref_r, Propagation::OutsideIn).unwrap(),
                t.delta_phi_full(ref_r, Propagation::OutsideIn).unwrap(),
            ),
        ];
        for (decoupled, full) in pairs {
            assert_relative_eq!(decoupled, full, max_relative = 1e-3);
        }
        // ∂s/∂ρ couples the planes only weakly for a stiff track
        let ctg = t.delta_ctg_theta(ref_r, Propagation::OutsideIn).unwrap();
        let ctg_full = t.delta_ctg_theta_full(ref_r, Propagation::OutsideIn).unwrap();
        assert_relative_eq!(ctg, ctg_full, max_relative = 1e-2);
        assert!(t.delta_z_full(ref_r, Propagation::OutsideIn).is_ok());
        assert!(t.delta_pt_over_pt_full(ref_r, Propagation::OutsideIn).unwrap() > 0.0);
    }

    #[test]
    fn test_time_resolution() {
        let params = FitParams::builder().particle_mass(0.0).build().unwrap();
        let mut t = Track::new(Arc::new(params));
        t.set_theta_phi_pt(FRAC_PI_2, 0.0, 1.0, Propagation::InsideOut)
            .unwrap();
        assert_eq!(t.delta_t0(), Err(TrackError::NoTimeHits));

        t.add_hit(Hit::time(400.0, 0.0, 0.03));
        t.add_hit(Hit::time(420.0, 0.0, 0.03));
        assert_relative_eq!(t.delta_t0().unwrap(), 0.03 / SQRT_2, max_relative = 1e-12);
        assert_relative_eq!(t.delta_t(410.0).unwrap(), 0.03 / SQRT_2, max_relative = 1e-12);
    }

    #[test]
    fn test_time_of_flight_only_between_timing_layers() {
        let params = FitParams::builder().particle_mass(5.0).build().unwrap();
        let mut t = Track::new(Arc::new(params));
        t.set_theta_phi_pt(FRAC_PI_2, 0.0, 2.0, Propagation::InsideOut)
            .unwrap();
        t.add_ip_constraint(0.005, 0.005);
        for r in [30.0, 60.0, 90.0, 120.0, 150.0] {
            t.add_hit(Hit::measurement(r, 0.0, 0.010, 0.010).with_material(Material::new(0.02, 0.0)));
        }
        t.add_hit(Hit::time(400.0, 0.0, 0.03));
        t.add_hit(Hit::time(1100.0, 0.0, 0.03));
        let plain = 0.03 / SQRT_2;

        // below and above the timing layers: plain combination
        assert_relative_eq!(t.delta_t0().unwrap(), plain, max_relative = 1e-12);
        assert_relative_eq!(t.delta_t(1200.0).unwrap(), plain, max_relative = 1e-12);

        // inside the span the far layer pays for the flight path
        let inside = t.delta_t(400.0).unwrap();
        assert!(inside > plain);
        assert!(inside < 0.03);
    }

    #[test]
    fn test_ctau() {
        let mut t = track(1.0, 5.0, &[30.0, 60.0, 90.0, 120.0], 0.01);
        let d0 = t.delta_d0().unwrap();
        let z0 = t.delta_z0().unwrap() * 1.0_f64.sin();
        let ctau = t.delta_ctau().unwrap();
        assert_relative_eq!(ctau, SQRT_2 / (1.0 / (d0 * d0) + 1.0 / (z0 * z0)).sqrt(), max_relative = 1e-12);
        assert!(ctau < SQRT_2 * d0.min(z0));
    }
}
