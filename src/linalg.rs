//! Small dense linear algebra used by the fit engine.
//!
//! Everything the track model needs from a matrix library goes through the
//! helpers below, so the rest of the crate only deals with `nalgebra`'s plain
//! matrix types.
use nalgebra::{DMatrix, SMatrix};

/// Generalized least-squares parameter covariance `(Aᵀ V⁻¹ A)⁻¹`.
///
/// Arguments
/// -----------------
/// * `design`: `n × p` design matrix `A` (one row per measurement).
/// * `variance`: `n × n` symmetric measurement covariance `V`.
///
/// Return
/// ----------
/// * `None` if either `V` or the normal matrix `Aᵀ V⁻¹ A` is not positive
///   definite (rank-deficient design, zero resolution without scattering, ...).
pub(crate) fn gls_covariance(design: &DMatrix<f64>, variance: DMatrix<f64>) -> Option<DMatrix<f64>> {
    let weights = variance.cholesky()?;
    let whitened = weights.solve(design);
    let normal = design.transpose() * whitened;
    let normal = normal.cholesky()?;
    let covariance = normal.inverse();
    covariance
        .iter()
        .all(|v| v.is_finite())
        .then_some(covariance)
}

/// Copy a dynamically sized square matrix into its fixed-size counterpart.
pub(crate) fn to_fixed<const N: usize>(m: &DMatrix<f64>) -> SMatrix<f64, N, N> {
    m.fixed_view::<N, N>(0, 0).into_owned()
}

/// Congruence transform `J C Jᵀ`.
pub(crate) fn propagate<const N: usize>(
    jacobian: &SMatrix<f64, N, N>,
    covariance: &SMatrix<f64, N, N>,
) -> SMatrix<f64, N, N> {
    jacobian * covariance * jacobian.transpose()
}

/// Square roots of the diagonal, `None` if any variance is negative.
pub(crate) fn sigmas<const N: usize>(covariance: &SMatrix<f64, N, N>) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let var = covariance[(i, i)];
        if var < 0.0 {
            return None;
        }
        *slot = var.sqrt();
    }
    Some(out)
}
