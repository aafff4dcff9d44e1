use std::fmt;

/// Characteristic polynomial `f(x) = x⁴ + c0·x² + c1·x + c2` of the
/// attitude profile matrix, with `d(x) = 4x³ + 2c0·x + c1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharacteristicPolynomial {
    c0: f64,
    c1: f64,
    c2: f64,
}

impl CharacteristicPolynomial {
    pub fn new(c0: f64, c1: f64, c2: f64) -> Self {
        Self { c0, c1, c2 }
    }

    pub fn f(&self, x: f64) -> f64 {
        let x2 = x * x;
        x2 * x2 + self.c0 * x2 + self.c1 * x + self.c2
    }

    pub fn d(&self, x: f64) -> f64 {
        4.0 * x * x * x + 2.0 * self.c0 * x + self.c1
    }

    /// Newton iteration from `initial`, done when both the step and
    /// `|f(x)|` are within `accuracy`.
    pub fn newton_raphson(&self, initial: f64, accuracy: f64, max_iterations: usize) -> Option<f64> {
        let mut x = initial;
        for _ in 0..max_iterations {
            let f = self.f(x);
            let d = self.d(x);
            if d == 0.0 || !d.is_finite() {
                return None;
            }
            let step = f / d;
            x -= step;
            if !x.is_finite() {
                return None;
            }
            if step.abs() <= accuracy && f.abs() <= accuracy {
                return Some(x);
            }
        }
        None
    }
}

impl fmt::Display for CharacteristicPolynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "f(x) = x^4 + ({})x^2 + ({})x + ({}); d(x) = 4x^3 + ({})x + ({})",
            self.c0,
            self.c1,
            self.c2,
            2.0 * self.c0,
            self.c1
        )
    }
}
