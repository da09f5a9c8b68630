//! Constraint helpers for the arc-length corrector.
//!
//! All functions work on the step increment `(ΔU, Δλ)` measured from the base
//! point of the current step, with `psi2ff = ψ² FᵀF` weighting the load term.

use nalgebra::DVector;

/// Length of an increment in the constraint metric.
pub(crate) fn constraint_norm(du: &DVector<f64>, dl: f64, psi2ff: f64) -> f64 {
    (du.dot(du) + psi2ff * dl * dl).sqrt()
}

/// Rescales a direction so that it has the given arc-length.
pub(crate) fn scaled_to_length(
    du: &DVector<f64>,
    dl: f64,
    psi2ff: f64,
    length: f64,
) -> Option<(DVector<f64>, f64)> {
    let norm = constraint_norm(du, dl, psi2ff);
    if !(norm > 0.0 && norm.is_finite()) {
        return None;
    }
    let factor = length / norm;
    Some((du * factor, dl * factor))
}

/// Load correction keeping the iterate on the hyperplane normal to the step predictor.
pub(crate) fn riks_correction(
    du: &DVector<f64>,
    dl: f64,
    du_bar: &DVector<f64>,
    du_t: &DVector<f64>,
    psi2ff: f64,
    predictor: (&DVector<f64>, f64),
) -> f64 {
    let (pred_du, pred_dl) = predictor;
    let plane = pred_du.dot(&(du - pred_du)) + psi2ff * pred_dl * (dl - pred_dl);
    -(plane + pred_du.dot(du_bar)) / (pred_du.dot(du_t) + psi2ff * pred_dl)
}

/// Load correction from the spherical constraint linearized at the current iterate.
///
/// The constraint residual is carried along, so iterates that drift off the
/// sphere are pulled back onto it.
pub(crate) fn linearized_sphere_correction(
    du: &DVector<f64>,
    dl: f64,
    du_bar: &DVector<f64>,
    du_t: &DVector<f64>,
    psi2ff: f64,
    length: f64,
) -> f64 {
    let constraint = du.dot(du) + psi2ff * dl * dl - length * length;
    -(constraint + 2.0 * du.dot(du_bar)) / (2.0 * du.dot(du_t) + 2.0 * psi2ff * dl)
}

/// Load correction from the exact spherical constraint.
///
/// Of the two roots, the one whose resulting increment points furthest along
/// `reference` wins. Returns `None` when the quadratic has no real root.
pub(crate) fn crisfield_correction(
    du: &DVector<f64>,
    dl: f64,
    du_bar: &DVector<f64>,
    du_t: &DVector<f64>,
    psi2ff: f64,
    length: f64,
    reference: (&DVector<f64>, f64),
) -> Option<f64> {
    let base = du + du_bar;
    let a1 = du_t.dot(du_t) + psi2ff;
    let a2 = 2.0 * (du_t.dot(&base) + psi2ff * dl);
    let a3 = base.dot(&base) + psi2ff * dl * dl - length * length;

    let discriminant = a2 * a2 - 4.0 * a1 * a3;
    if !(discriminant >= 0.0) || a1 <= 0.0 {
        return None;
    }

    let sqrt_disc = discriminant.sqrt();
    let roots = [
        (-a2 + sqrt_disc) / (2.0 * a1),
        (-a2 - sqrt_disc) / (2.0 * a1),
    ];

    let (ref_du, ref_dl) = reference;
    let alignment = |root: f64| (&base + du_t * root).dot(ref_du) + psi2ff * (dl + root) * ref_dl;

    let (first, second) = (roots[0], roots[1]);
    if alignment(first) >= alignment(second) {
        Some(first)
    } else {
        Some(second)
    }
}

pub(crate) fn is_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}
