//! Attitude from vector observations (TRIAD, QUEST)

pub mod adjoint;
pub mod polynomial;
pub mod quest;
pub mod triad;

pub use adjoint::{adjoint_symmetric, determinant};
pub use polynomial::CharacteristicPolynomial;
pub use quest::quest;
pub use triad::triad;
