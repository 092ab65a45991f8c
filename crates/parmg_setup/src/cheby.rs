//! Chebyshev smoother planning.

/// Given the spectral ratio `rho` of the scaled fine operator and a target
/// residual contraction `tol`, pick the smallest polynomial degree whose
/// damped Chebyshev residual recurrence contracts below the target.
/// Returns (degree m, achieved contraction c).
///
/// The recurrence contracts at least as fast as powers of `rho < 1`, so
/// the loop terminates.
pub fn chebsim(rho: f64, tol: f64) -> (u32, f64) {
    let alpha = 0.25 * rho * rho;
    let mut m = 1u32;
    let mut cp = 1.0;
    let mut c = rho;
    let mut gamma = 1.0;
    while c > tol {
        m += 1;
        let d = alpha * (1.0 + gamma);
        gamma = d / (1.0 - d);
        let cn = (1.0 + gamma) * rho * c - gamma * cp;
        cp = c;
        c = cn;
    }
    (m, c)
}
