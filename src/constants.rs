//! # Constants and type definitions for trackfit
//!
//! This module centralizes the **physical constants**, **conversion factors** and
//! **unit aliases** used by the track model.
//!
//! ## Units
//!
//! The whole crate works in a single unit system:
//!
//! - lengths in millimetres,
//! - momenta and masses in GeV (natural units, `c = 1` for kinematics),
//! - magnetic field in Tesla,
//! - time in nanoseconds,
//! - angles in radians.

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Curvature conversion: pT[GeV/c] = K · Bz[T] · R[m]
pub const K_FIELD: f64 = 0.299792458;

/// Metres → millimetres
pub const M_TO_MM: f64 = 1e3;

/// Speed of light in mm/ns
pub const C_MM_PER_NS: f64 = 299.792458;

/// Highland formula scale (13.6 MeV expressed in GeV)
pub const MS_HIGHLAND_SCALE: f64 = 0.0136;

/// Highland formula logarithmic correction coefficient
pub const MS_HIGHLAND_LOG: f64 = 0.038;

/// Charged pion mass in GeV, used as default hypothesis for time-of-flight corrections
pub const PION_MASS: f64 = 0.13957039;

/// Default solenoid field in Tesla
pub const DEFAULT_FIELD: f64 = 3.8;

/// Default guard factor applied to the curling diameter when pruning hits.
///
/// It bounds `sin(φ - φ0)` along the trajectory, keeping hits away from the
/// shallow-angle region where the parabolic approximation degrades.
pub const DEFAULT_CURLING_GUARD: f64 = 0.8;

/// Tag selecting every subdetector
pub const TAG_ALL: &str = "all";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Distance in millimetres
pub type Millimeter = f64;
/// Momentum or mass in GeV
pub type GeV = f64;
/// Magnetic field in Tesla
pub type Tesla = f64;
/// Time in nanoseconds
pub type Nanosecond = f64;
/// Angle in radians
pub type Radian = f64;
