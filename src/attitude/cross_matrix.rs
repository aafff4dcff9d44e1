use crate::types::linalg::{Matrix3, Vector3};

/// Skew-symmetric `[v]×` with `[v]× w == v × w`
pub fn cross_matrix(v: &Vector3) -> Matrix3 {
    Matrix3::new(
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    )
}

/// `[v]×` raised to `P` by repeated multiplication
pub fn cross_matrix_power<const P: u32>(v: &Vector3) -> Matrix3 {
    let m = cross_matrix(v);
    let mut res = Matrix3::identity();
    for _ in 0..P {
        res *= m;
    }
    res
}
