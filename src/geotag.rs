//! Reading and writing geotags.
//!
//! ```no_run
//! use geotag::{read_geo_tag, write_geo_tag, GeoTag};
//!
//! # fn main() -> geotag::Result<()> {
//! write_geo_tag("photo.jpg", &GeoTag::new(-49.9120223, -98.2690366, 261.64).heading(45.2))?;
//! let record = read_geo_tag("photo.jpg")?;
//! assert_eq!(record.latitude, Some(-49.9120223));
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::coord::{self, check_angle, AltitudeRef, Axis, Dms};
use crate::error::{Error, Result};
use crate::jpeg::JpegFile;
use crate::metadata::Metadata;
use crate::rational::{round_to, Rational};
use crate::tag::gps;
use crate::xmp;
use crate::EntryData;

const ALTITUDE_DENOM: u32 = 10_000_000;
const ALTITUDE_DIGITS: i32 = 7;
const HEADING_DENOM: u32 = 100;
const HEADING_DIGITS: i32 = 2;

/// Geotag found in an image. Each field is `None` when the image does not
/// carry it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeoTagRecord {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// metres, negative below sea level
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
}

/// Geotag to write. Position and altitude are required; heading and
/// attitude are written only when set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTag {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: Option<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
}

impl GeoTag {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        GeoTag { latitude, longitude, altitude, heading: None, roll: None, pitch: None, yaw: None }
    }

    pub fn heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn roll(mut self, roll: f64) -> Self {
        self.roll = Some(roll);
        self
    }

    pub fn pitch(mut self, pitch: f64) -> Self {
        self.pitch = Some(pitch);
        self
    }

    pub fn yaw(mut self, yaw: f64) -> Self {
        self.yaw = Some(yaw);
        self
    }

    /// Check every supplied value without touching any image.
    pub fn validate(&self) -> Result<()> {
        Axis::Latitude.check(self.latitude)?;
        Axis::Longitude.check(self.longitude)?;
        altitude_rational(self.altitude)?;
        for (field, value) in self.angles() {
            if let Some(v) = value {
                check_angle(field, v)?;
            }
        }
        Ok(())
    }

    fn angles(&self) -> [(&'static str, Option<f64>); 4] {
        [("heading", self.heading), ("roll", self.roll), ("pitch", self.pitch), ("yaw", self.yaw)]
    }

    fn attitude(&self) -> [(&'static str, Option<f64>); 3] {
        [(xmp::ROLL, self.roll), (xmp::PITCH, self.pitch), (xmp::YAW, self.yaw)]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// sign applied to an altitude stored without GPSAltitudeRef
    pub missing_altitude_ref: AltitudeRef,
}

pub fn read_geo_tag<P: AsRef<Path>>(path: P) -> Result<GeoTagRecord> {
    read_geo_tag_with(path, &ReadOptions::default())
}

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_geo_tag_with<P: AsRef<Path>>(path: P, opts: &ReadOptions) -> Result<GeoTagRecord> {
    let jpeg = JpegFile::open(path)?;
    let meta = Metadata::load(&jpeg)?;
    read_metadata(&meta, opts)
}

/// Extract a geotag from already loaded metadata.
pub fn read_metadata(meta: &Metadata, opts: &ReadOptions) -> Result<GeoTagRecord> {
    Ok(GeoTagRecord {
        latitude: read_coordinate(meta, Axis::Latitude)?,
        longitude: read_coordinate(meta, Axis::Longitude)?,
        altitude: read_altitude(meta, opts)?,
        heading: read_heading(meta)?,
        roll: read_attitude(meta, xmp::ROLL)?,
        pitch: read_attitude(meta, xmp::PITCH)?,
        yaw: read_attitude(meta, xmp::YAW)?,
    })
}

fn read_coordinate(meta: &Metadata, axis: Axis) -> Result<Option<f64>> {
    let (value_tag, ref_tag) = match axis {
        Axis::Latitude => (gps::LATITUDE, gps::LATITUDE_REF),
        Axis::Longitude => (gps::LONGITUDE, gps::LONGITUDE_REF),
    };

    let dms: Dms = match meta.gps(value_tag) {
        None => return Ok(None),
        Some(data) => data
            .as_rationals()
            .and_then(|r| r.try_into().ok())
            .ok_or_else(|| Error::malformed(format!("{} is not three rationals", axis.name())))?,
    };

    let reference = match meta.gps(ref_tag) {
        Some(data) => data
            .as_ascii()
            .ok_or_else(|| Error::malformed(format!("{} reference is not ascii", axis.name())))?,
        None => {
            warn!(axis = axis.name(), "no reference stored, assuming {}", axis.default_reference());
            axis.default_reference()
        }
    };

    coord::dms_to_decimal(&dms, axis, reference).map(Some)
}

fn read_altitude(meta: &Metadata, opts: &ReadOptions) -> Result<Option<f64>> {
    let magnitude = match meta.gps(gps::ALTITUDE) {
        None => return Ok(None),
        Some(data) => first_rational(data, "altitude")?,
    };

    let reference = match meta.gps(gps::ALTITUDE_REF) {
        Some(data) => {
            let b = data
                .first_u8()
                .ok_or_else(|| Error::malformed("altitude reference is not a byte"))?;
            AltitudeRef::from_byte(b)?
        }
        None => {
            warn!(assumed = ?opts.missing_altitude_ref, "no altitude reference stored");
            opts.missing_altitude_ref
        }
    };

    Ok(Some(reference.sign() * round_to(magnitude, ALTITUDE_DIGITS)))
}

fn read_heading(meta: &Metadata) -> Result<Option<f64>> {
    match meta.gps(gps::IMG_DIRECTION) {
        None => Ok(None),
        Some(data) => Ok(Some(round_to(first_rational(data, "heading")?, HEADING_DIGITS))),
    }
}

fn read_attitude(meta: &Metadata, name: &str) -> Result<Option<f64>> {
    meta.attitude(name)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| Error::malformed(format!("{} {:?}: {}", name, s, e)))
        })
        .transpose()
}

fn first_rational(data: &EntryData, field: &str) -> Result<f64> {
    data.as_rationals()
        .and_then(|r| r.first())
        .and_then(|r| r.to_f64())
        .ok_or_else(|| Error::malformed(format!("{} is not a usable rational", field)))
}

/// Magnitude of `alt` at 7 decimal digits, with fewer digits when the
/// numerator would not fit in 32 bits.
fn altitude_rational(alt: f64) -> Result<Rational> {
    let magnitude = alt.abs();
    if !magnitude.is_finite() {
        return Err(Error::Range { field: "altitude", value: alt });
    }

    let mut denom = ALTITUDE_DENOM;
    while magnitude * denom as f64 > u32::MAX as f64 {
        if denom == 1 {
            return Err(Error::Range { field: "altitude", value: alt });
        }
        denom /= 10;
    }
    Ok(Rational::new((magnitude * denom as f64).round() as u32, denom))
}

fn heading_rational(hdg: f64) -> Rational {
    // 359.995 and up round to 360.00, which is the same bearing as 0
    let hundredths = (hdg * HEADING_DENOM as f64).round() as u32 % (360 * HEADING_DENOM);
    Rational::new(hundredths, HEADING_DENOM)
}

/// Merge a geotag into loaded metadata. Every value is validated before the
/// first field changes.
pub fn apply_geo_tag(meta: &mut Metadata, tag: &GeoTag) -> Result<()> {
    tag.validate()?;

    let lat = coord::decimal_to_dms(tag.latitude, Axis::Latitude)?;
    let lat_ref = Axis::Latitude.reference_for(tag.latitude)?;
    let lon = coord::decimal_to_dms(tag.longitude, Axis::Longitude)?;
    let lon_ref = Axis::Longitude.reference_for(tag.longitude)?;
    let alt = altitude_rational(tag.altitude)?;
    let alt_ref = AltitudeRef::for_altitude(tag.altitude);

    if tag.attitude().iter().any(|(_, v)| v.is_some()) {
        xmp::register_attitude_namespace()?;
    }

    meta.set_gps(gps::LATITUDE_REF, EntryData::Ascii(lat_ref.into()));
    meta.set_gps(gps::LATITUDE, EntryData::URational(lat.to_vec()));
    meta.set_gps(gps::LONGITUDE_REF, EntryData::Ascii(lon_ref.into()));
    meta.set_gps(gps::LONGITUDE, EntryData::URational(lon.to_vec()));
    meta.set_gps(gps::ALTITUDE_REF, EntryData::Byte(vec![alt_ref.as_byte()]));
    meta.set_gps(gps::ALTITUDE, EntryData::URational(vec![alt]));

    if let Some(hdg) = tag.heading {
        meta.set_gps(gps::IMG_DIRECTION, EntryData::URational(vec![heading_rational(hdg)]));
    }

    for (name, value) in tag.attitude() {
        if let Some(v) = value {
            meta.set_attitude(name, v.to_string());
        }
    }

    Ok(())
}

/// Write a geotag into the JPEG at `path`, replacing any existing GPS
/// position, altitude and heading and the supplied attitude values.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn write_geo_tag<P: AsRef<Path>>(path: P, tag: &GeoTag) -> Result<()> {
    tag.validate()?;

    let mut jpeg = JpegFile::open(path.as_ref())?;
    let mut meta = Metadata::load(&jpeg)?;
    apply_geo_tag(&mut meta, tag)?;
    meta.store(&mut jpeg)?;
    jpeg.persist()?;

    info!(
        heading = tag.heading.is_some(),
        roll = tag.roll.is_some(),
        pitch = tag.pitch.is_some(),
        yaw = tag.yaw.is_some(),
        "wrote geotag"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::tests::tiny_jpeg;
    use crate::tag;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn blank() -> (JpegFile, Metadata) {
        let jpeg = JpegFile::from_bytes(&tiny_jpeg()).unwrap();
        let meta = Metadata::load(&jpeg).unwrap();
        (jpeg, meta)
    }

    fn write_then_read(tag: &GeoTag) -> GeoTagRecord {
        let (mut jpeg, mut meta) = blank();
        apply_geo_tag(&mut meta, tag).unwrap();
        meta.store(&mut jpeg).unwrap();

        let reparsed = JpegFile::from_bytes(&jpeg.to_bytes()).unwrap();
        read_metadata(&Metadata::load(&reparsed).unwrap(), &ReadOptions::default()).unwrap()
    }

    #[test]
    fn blank_image_reads_as_empty_record() {
        let (_, meta) = blank();
        assert_eq!(read_metadata(&meta, &ReadOptions::default()).unwrap(), GeoTagRecord::default());
    }

    #[test_log::test]
    fn position_round_trips() {
        let record = write_then_read(&GeoTag::new(-49.9120223, -98.2690366, 261.64));
        assert_eq!(
            record,
            GeoTagRecord {
                latitude: Some(-49.9120223),
                longitude: Some(-98.2690366),
                altitude: Some(261.64),
                ..Default::default()
            }
        );
    }

    #[test_log::test]
    fn heading_and_attitude_round_trip() {
        let tag = GeoTag::new(-83.0923535, -0.9235098, 189.99)
            .heading(359.99)
            .roll(123.1)
            .yaw(103.23);
        assert_eq!(
            write_then_read(&tag),
            GeoTagRecord {
                latitude: Some(-83.0923535),
                longitude: Some(-0.9235098),
                altitude: Some(189.99),
                heading: Some(359.99),
                roll: Some(123.1),
                pitch: None,
                yaw: Some(103.23),
            }
        );
    }

    #[test]
    fn below_sea_level_round_trips() {
        let record = write_then_read(&GeoTag::new(31.5, 35.5, -430.5));
        assert_eq!(record.altitude, Some(-430.5));
    }

    #[test]
    fn large_altitudes_lose_digits_not_range() {
        assert_eq!(altitude_rational(261.64).unwrap(), Rational::new(2616400000, 10_000_000));
        assert_eq!(altitude_rational(8848.86).unwrap(), Rational::new(884886000, 100_000));
        assert_eq!(write_then_read(&GeoTag::new(0.0, 0.0, 8848.86)).altitude, Some(8848.86));
        assert!(matches!(altitude_rational(f64::INFINITY), Err(Error::Range { .. })));
        assert!(matches!(altitude_rational(5e9), Err(Error::Range { .. })));
    }

    #[test]
    fn heading_wraps_at_full_circle() {
        assert_eq!(heading_rational(359.99), Rational::new(35999, 100));
        assert_eq!(heading_rational(359.996), Rational::new(0, 100));
        assert_eq!(heading_rational(0.29), Rational::new(29, 100));
    }

    #[rstest]
    #[case(GeoTag::new(90.0001, 0.0, 0.0))]
    #[case(GeoTag::new(0.0, -180.0001, 0.0))]
    #[case(GeoTag::new(0.0, 0.0, f64::NAN))]
    #[case(GeoTag::new(0.0, 0.0, 0.0).heading(360.0))]
    #[case(GeoTag::new(0.0, 0.0, 0.0).heading(-0.01))]
    #[case(GeoTag::new(0.0, 0.0, 0.0).roll(400.0))]
    #[case(GeoTag::new(0.0, 0.0, 0.0).pitch(-1.0))]
    #[case(GeoTag::new(0.0, 0.0, 0.0).heading(10.0).yaw(360.0))]
    fn invalid_values_change_nothing(#[case] tag: GeoTag) {
        let (_, mut meta) = blank();
        assert!(matches!(apply_geo_tag(&mut meta, &tag), Err(Error::Range { .. })));
        assert_eq!(read_metadata(&meta, &ReadOptions::default()).unwrap(), GeoTagRecord::default());
        assert!(meta.exif().ifds.is_empty());
    }

    #[test]
    fn boundary_values_are_accepted() {
        let tag = GeoTag::new(-90.0, 180.0, 0.0).heading(0.0).roll(359.99);
        let record = write_then_read(&tag);
        assert_eq!(record.latitude, Some(-90.0));
        assert_eq!(record.longitude, Some(180.0));
        assert_eq!(record.heading, Some(0.0));
        assert_eq!(record.roll, Some(359.99));
    }

    #[test_log::test]
    fn missing_references_fall_back_to_defaults() {
        let (_, mut meta) = blank();
        let lat = coord::decimal_to_dms(10.5, Axis::Latitude).unwrap();
        let lon = coord::decimal_to_dms(20.25, Axis::Longitude).unwrap();
        meta.set_gps(tag::gps::LATITUDE, EntryData::URational(lat.to_vec()));
        meta.set_gps(tag::gps::LONGITUDE, EntryData::URational(lon.to_vec()));
        meta.set_gps(tag::gps::ALTITUDE, EntryData::URational(vec![Rational::new(30, 1)]));

        let record = read_metadata(&meta, &ReadOptions::default()).unwrap();
        assert_eq!(record.latitude, Some(10.5));
        assert_eq!(record.longitude, Some(20.25));
        assert_eq!(record.altitude, Some(-30.0));

        let opts = ReadOptions { missing_altitude_ref: AltitudeRef::AboveSeaLevel };
        assert_eq!(read_metadata(&meta, &opts).unwrap().altitude, Some(30.0));
    }

    #[rstest]
    #[case(b'0', 30.0)]
    #[case(b'1', -30.0)]
    fn ascii_altitude_reference_is_read(#[case] reference: u8, #[case] expected: f64) {
        let (_, mut meta) = blank();
        meta.set_gps(tag::gps::ALTITUDE, EntryData::URational(vec![Rational::new(30, 1)]));
        meta.set_gps(tag::gps::ALTITUDE_REF, EntryData::Byte(vec![reference]));

        let record = read_metadata(&meta, &ReadOptions::default()).unwrap();
        assert_eq!(record.altitude, Some(expected));
    }

    #[test]
    fn reference_without_value_is_absent() {
        let (_, mut meta) = blank();
        meta.set_gps(tag::gps::LATITUDE_REF, EntryData::Ascii("N".into()));
        meta.set_gps(tag::gps::ALTITUDE_REF, EntryData::Byte(vec![0]));

        assert_eq!(read_metadata(&meta, &ReadOptions::default()).unwrap(), GeoTagRecord::default());
    }

    #[test]
    fn bad_stored_values_are_reported() {
        let (_, mut meta) = blank();
        let lat = coord::decimal_to_dms(10.5, Axis::Latitude).unwrap();
        meta.set_gps(tag::gps::LATITUDE, EntryData::URational(lat.to_vec()));
        meta.set_gps(tag::gps::LATITUDE_REF, EntryData::Ascii("X".into()));
        assert!(matches!(
            read_metadata(&meta, &ReadOptions::default()),
            Err(Error::InvalidReference { .. })
        ));

        let (_, mut meta) = blank();
        meta.set_gps(tag::gps::ALTITUDE, EntryData::URational(vec![Rational::new(30, 1)]));
        meta.set_gps(tag::gps::ALTITUDE_REF, EntryData::Byte(vec![2]));
        assert!(matches!(
            read_metadata(&meta, &ReadOptions::default()),
            Err(Error::InvalidReference { .. })
        ));

        let (_, mut meta) = blank();
        meta.set_gps(tag::gps::LONGITUDE, EntryData::Ascii("12.5".into()));
        assert!(matches!(read_metadata(&meta, &ReadOptions::default()), Err(Error::Malformed(_))));

        let (_, mut meta) = blank();
        meta.set_attitude(xmp::PITCH, "level".into());
        assert!(matches!(read_metadata(&meta, &ReadOptions::default()), Err(Error::Malformed(_))));
    }

    #[test]
    fn unsupplied_attitude_is_kept() {
        let (mut jpeg, mut meta) = blank();
        apply_geo_tag(&mut meta, &GeoTag::new(1.0, 2.0, 3.0).roll(10.0).pitch(20.0)).unwrap();
        meta.store(&mut jpeg).unwrap();

        let mut meta = Metadata::load(&jpeg).unwrap();
        apply_geo_tag(&mut meta, &GeoTag::new(1.0, 2.0, 3.0).pitch(25.5)).unwrap();
        meta.store(&mut jpeg).unwrap();

        let meta = Metadata::load(&jpeg).unwrap();
        let record = read_metadata(&meta, &ReadOptions::default()).unwrap();
        assert_eq!((record.roll, record.pitch, record.yaw), (Some(10.0), Some(25.5), None));
    }
}
