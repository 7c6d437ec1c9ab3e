use std::fmt;

use thiserror::Error;

/// Fit plane a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPlane {
    /// Transverse plane: 1/R, φ0, D0
    RPhi,
    /// Longitudinal plane: cot θ, z0
    SZ,
    /// Joint 5-parameter formulation
    Full,
}

impl fmt::Display for FitPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitPlane::RPhi => write!(f, "R-Phi"),
            FitPlane::SZ => write!(f, "s-Z"),
            FitPlane::Full => write!(f, "full 5x5"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("Track direction and momentum have not been set")]
    UnsetKinematics,

    #[error("Invalid track kinematics: {0}")]
    InvalidKinematics(String),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),

    #[error("Invalid magnetic field map: {0}")]
    InvalidFieldMap(String),

    #[error("{plane} fit is underdetermined: {used} usable hits, {required} required")]
    Underdetermined {
        plane: FitPlane,
        used: usize,
        required: usize,
    },

    #[error("{0} normal equations are singular")]
    SingularSystem(FitPlane),

    #[error("Track curvature is undefined (zero field or infinite radius)")]
    UndefinedCurvature,

    #[error("Propagated {0} covariance has a negative variance")]
    NegativeVariance(FitPlane),

    #[error("Track has no active time hits")]
    NoTimeHits,
}
