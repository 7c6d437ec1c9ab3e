//! # trackfit
//!
//! Analytic parameter-error estimation for charged-particle tracks crossing a
//! layered detector in a solenoidal magnetic field.
//!
//! A [`track::Track`] collects detector [`hit::Hit`]s, is given a direction and
//! a transverse momentum, and answers how well its helix parameters
//! `(1/R, φ, D, cot θ, z)` would be measured at any reference radius, including
//! multiple Coulomb scattering on every crossed material layer.
pub mod constants;
pub mod fit_params;
pub mod hit;
mod linalg;
pub mod magnetic_field;
pub mod track;
pub mod track_errors;
