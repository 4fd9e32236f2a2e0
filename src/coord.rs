//! Conversion between signed decimal degrees and the unsigned
//! degrees/minutes/seconds rationals used by the EXIF GPS tags.
//!
//! The DMS triple never carries a sign: the hemisphere lives in a separate
//! one-character reference (`N`/`S`, `E`/`W`).

use crate::error::{Error, Result};
use crate::rational::{round_to, Rational};

/// seconds are stored with 7 decimal digits
pub const SECONDS_DENOM: u32 = 10_000_000;

/// decimal digits kept when converting back to degrees
pub const COORD_DIGITS: i32 = 7;

/// degrees, minutes, seconds
pub type Dms = [Rational; 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::Latitude => "latitude",
            Axis::Longitude => "longitude",
        }
    }

    /// largest absolute value allowed on this axis
    pub fn limit(self) -> f64 {
        match self {
            Axis::Latitude => 90.0,
            Axis::Longitude => 180.0,
        }
    }

    /// Reject values outside `[-limit, limit]`, NaN included.
    pub fn check(self, value: f64) -> Result<f64> {
        if value.abs() <= self.limit() {
            Ok(value)
        } else {
            Err(Error::Range { field: self.name(), value })
        }
    }

    /// Reference assumed when a file carries the value but not its reference.
    pub fn default_reference(self) -> &'static str {
        match self {
            Axis::Latitude => "N",
            Axis::Longitude => "E",
        }
    }

    /// Hemisphere reference for a signed coordinate; zero belongs to the
    /// positive hemisphere.
    pub fn reference_for(self, value: f64) -> Result<&'static str> {
        let positive = self.check(value)? >= 0.0;
        Ok(match (self, positive) {
            (Axis::Latitude, true) => "N",
            (Axis::Latitude, false) => "S",
            (Axis::Longitude, true) => "E",
            (Axis::Longitude, false) => "W",
        })
    }

    /// Sign implied by a hemisphere reference, case-insensitive.
    pub fn sign_of(self, reference: &str) -> Result<f64> {
        match (self, reference) {
            (Axis::Latitude, "N") | (Axis::Latitude, "n") => Ok(1.0),
            (Axis::Latitude, "S") | (Axis::Latitude, "s") => Ok(-1.0),
            (Axis::Longitude, "E") | (Axis::Longitude, "e") => Ok(1.0),
            (Axis::Longitude, "W") | (Axis::Longitude, "w") => Ok(-1.0),
            _ => Err(Error::InvalidReference {
                field: self.name(),
                reference: reference.to_owned(),
            }),
        }
    }
}

/// Convert a decimal coordinate to an unsigned DMS triple.
///
/// Seconds are truncated (not rounded) to 7 decimal digits.
pub fn decimal_to_dms(coord: f64, axis: Axis) -> Result<Dms> {
    let a = axis.check(coord)?.abs();
    let d = a.floor();
    let m = ((a - d) * 60.0).floor();
    let s = (a - d - m / 60.0) * 3600.0;

    Ok([
        Rational::integer(d as u32),
        Rational::integer(m as u32),
        Rational::new((s * SECONDS_DENOM as f64) as u32, SECONDS_DENOM),
    ])
}

/// Convert a DMS triple and its reference back to signed decimal degrees,
/// rounded to 7 digits.
pub fn dms_to_decimal(dms: &Dms, axis: Axis, reference: &str) -> Result<f64> {
    let [deg, min, sec] = (*dms).map(|r| {
        r.to_f64().ok_or_else(|| {
            Error::malformed(format!("{} has a zero denominator: {}", axis.name(), r))
        })
    });
    let deg = axis.check(deg?)?;

    let dec = deg + min? / 60.0 + sec? / 3600.0;
    let sign = axis.sign_of(reference)?;
    Ok(round_to(sign * dec, COORD_DIGITS))
}

/// Heading, roll, pitch and yaw all live in `[0, 360)`.
pub fn check_angle(field: &'static str, value: f64) -> Result<f64> {
    if (0.0..360.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::Range { field, value })
    }
}

/// GPSAltitudeRef
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AltitudeRef {
    AboveSeaLevel,
    /// legacy default for files without a reference
    #[default]
    BelowSeaLevel,
}

impl AltitudeRef {
    pub fn for_altitude(alt: f64) -> Self {
        if alt >= 0.0 {
            AltitudeRef::AboveSeaLevel
        } else {
            AltitudeRef::BelowSeaLevel
        }
    }

    /// Accepts the binary values and the ASCII digits `'0'`/`'1'` some
    /// writers store instead.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 | b'0' => Ok(AltitudeRef::AboveSeaLevel),
            1 | b'1' => Ok(AltitudeRef::BelowSeaLevel),
            other => Err(Error::InvalidReference {
                field: "altitude",
                reference: other.to_string(),
            }),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            AltitudeRef::AboveSeaLevel => 0,
            AltitudeRef::BelowSeaLevel => 1,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            AltitudeRef::AboveSeaLevel => 1.0,
            AltitudeRef::BelowSeaLevel => -1.0,
        }
    }
}
