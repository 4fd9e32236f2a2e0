use std::fmt;

/// Unsigned EXIF rational, numerator over denominator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: u32,
    pub denom: u32,
}

impl Rational {
    pub const fn new(num: u32, denom: u32) -> Self {
        Rational { num, denom }
    }

    pub const fn integer(num: u32) -> Self {
        Rational { num, denom: 1 }
    }

    /// value as a float, or None for a zero denominator
    pub fn to_f64(self) -> Option<f64> {
        if self.denom == 0 {
            None
        } else {
            Some(self.num as f64 / self.denom as f64)
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}

/// Signed EXIF rational.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SRational {
    pub num: i32,
    pub denom: i32,
}

impl SRational {
    pub const fn new(num: i32, denom: i32) -> Self {
        SRational { num, denom }
    }
}

/// Round to a fixed number of decimal digits, half away from zero.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominator_has_no_value() {
        assert_eq!(Rational::new(5, 0).to_f64(), None);
        assert_eq!(Rational::new(2616400000, 10_000_000).to_f64(), Some(261.64));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(33.123456789, 7), 33.1234568);
        assert_eq!(round_to(-33.123456789, 7), -33.1234568);
        assert_eq!(round_to(359.99, 2), 359.99);
    }
}
