//! # Track fit configuration
//!
//! [`FitParams`] gathers the knobs shared by every [`Track`](crate::track::Track)
//! of an evaluation run: the magnetic field map, the curling-radius guard used
//! when pruning hits, and the mass hypothesis for time-of-flight corrections.
//!
//! Parameters are built with the fluent [`FitParamsBuilder`], which validates
//! them before handing out a usable [`FitParams`]:
//!
//! ```rust
//! use trackfit::fit_params::FitParams;
//! use trackfit::magnetic_field::MagneticField;
//!
//! let params = FitParams::builder()
//!     .field(MagneticField::uniform(2.0))
//!     .curling_guard(0.7)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.curling_guard, 0.7);
//! ```
use std::cmp::Ordering::{Equal, Greater, Less};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{GeV, DEFAULT_CURLING_GUARD, PION_MASS},
    magnetic_field::MagneticField,
    track_errors::TrackError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    /// Solenoidal field `B(z)`
    pub field: MagneticField,
    /// Hits at `r ≥ curling_guard · 2R` are pruned
    pub curling_guard: f64,
    /// Mass hypothesis used for time-of-flight corrections
    pub particle_mass: GeV,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            field: MagneticField::default(),
            curling_guard: DEFAULT_CURLING_GUARD,
            particle_mass: PION_MASS,
        }
    }
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a [`FitParamsBuilder`] initialized with the default values.
    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }
}

#[derive(Debug, Clone)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl Default for FitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    pub fn field(mut self, v: MagneticField) -> Self {
        self.params.field = v;
        self
    }
    pub fn curling_guard(mut self, v: f64) -> Self {
        self.params.curling_guard = v;
        self
    }
    pub fn particle_mass(mut self, v: GeV) -> Self {
        self.params.particle_mass = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Return true iff a <= b and comparable (i.e., not NaN).
    #[inline]
    fn le(a: f64, b: f64) -> bool {
        matches!(a.partial_cmp(&b), Some(Less) | Some(Equal))
    }

    /// Validate and produce the [`FitParams`].
    ///
    /// Validation rules
    /// -----------------
    /// * `0 < curling_guard ≤ 1` – the guard shrinks the curling diameter, it
    ///   never extends it.
    /// * `particle_mass ≥ 0` and finite.
    pub fn build(self) -> Result<FitParams, TrackError> {
        let p = &self.params;

        if !Self::gt0(p.curling_guard) || !Self::le(p.curling_guard, 1.0) {
            return Err(TrackError::InvalidFitParameter(
                "curling_guard must lie in (0, 1]".into(),
            ));
        }
        if !Self::ge0(p.particle_mass) || !p.particle_mass.is_finite() {
            return Err(TrackError::InvalidFitParameter(
                "particle_mass must be finite and >= 0".into(),
            ));
        }

        Ok(self.params)
    }
}

#[cfg(test)]
mod fit_params_test {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = FitParams::builder().build().unwrap();
        assert_eq!(params, FitParams::default());
        assert_eq!(params.curling_guard, DEFAULT_CURLING_GUARD);
        assert!(params.field.is_uniform());
    }

    #[test]
    fn test_invalid_guard() {
        for guard in [0.0, -0.5, 1.5, f64::NAN] {
            let err = FitParams::builder().curling_guard(guard).build();
            assert!(
                matches!(err, Err(TrackError::InvalidFitParameter(_))),
                "guard {guard} accepted"
            );
        }
        assert!(FitParams::builder().curling_guard(1.0).build().is_ok());
    }

    #[test]
    fn test_invalid_mass() {
        assert!(FitParams::builder().particle_mass(-1.0).build().is_err());
        assert!(FitParams::builder()
            .particle_mass(f64::INFINITY)
            .build()
            .is_err());
        assert!(FitParams::builder().particle_mass(0.0).build().is_ok());
    }
}
