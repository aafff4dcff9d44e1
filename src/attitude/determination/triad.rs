use crate::attitude::quaternion::Quaternion;
use crate::error::{FilterError, FilterResult};
use crate::types::linalg::{Matrix3, Vector3};

const MIN_SIN_ANGLE: f64 = 1e-9;

/// Orthonormal triad as matrix rows: first vector, normalized cross of
/// the pair, and the cross of those two.
fn triad_basis(first: &Vector3, second: &Vector3) -> FilterResult<Matrix3> {
    let t1 = first
        .try_normalize(f64::MIN_POSITIVE)
        .ok_or_else(|| FilterError::DegenerateInput("zero first vector".into()))?;
    let s2 = second
        .try_normalize(f64::MIN_POSITIVE)
        .ok_or_else(|| FilterError::DegenerateInput("zero second vector".into()))?;

    let cross = t1.cross(&s2);
    let sin = cross.norm();
    if !(sin > MIN_SIN_ANGLE) {
        return Err(FilterError::DegenerateInput(format!(
            "parallel vectors, sin(angle) = {sin:e}"
        )));
    }
    let t2 = cross / sin;
    let t3 = t1.cross(&t2);

    Ok(Matrix3::from_rows(&[
        t1.transpose(),
        t2.transpose(),
        t3.transpose(),
    ]))
}

/// TRIAD attitude from two body-frame observations and the matching
/// reference-frame vectors. The first pair is matched exactly.
///
/// `S_observationᵀ·S_reference` maps reference vectors to observations;
/// the returned quaternion is its inverse rotation, so that
/// `q.rotate_vector(observation) == reference`.
pub fn triad(observations: &[Vector3; 2], references: &[Vector3; 2]) -> FilterResult<Quaternion> {
    let s_observation = triad_basis(&observations[0], &observations[1])?;
    let s_reference = triad_basis(&references[0], &references[1])?;

    let attitude = s_observation.transpose() * s_reference;
    Ok(Quaternion::from_rotation_matrix(&attitude).conjugate())
}
