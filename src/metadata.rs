use tracing::debug;

use crate::error::Result;
use crate::jpeg::JpegFile;
use crate::xmp::{self, Properties};
use crate::{EntryData, Exif};

/// In-memory view of the metadata a geotag touches: the EXIF GPS IFD
/// (standard namespace) and the XMP `Attitude` properties (custom namespace).
///
/// Changes are merged here and only reach the image through [`Metadata::store`].
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    exif: Exif,
    attitude: Properties,
    exif_dirty: bool,
    attitude_dirty: bool,
}

impl Metadata {
    pub fn load(jpeg: &JpegFile) -> Result<Self> {
        let exif = match jpeg.exif() {
            Some(tiff) => Exif::from_bytes(tiff)?,
            None => Exif::default(),
        };
        let attitude = match jpeg.xmp() {
            Some(packet) => xmp::read_properties(packet, xmp::ATTITUDE_URI)?,
            None => Properties::new(),
        };

        Ok(Metadata { exif, attitude, exif_dirty: false, attitude_dirty: false })
    }

    pub fn exif(&self) -> &Exif {
        &self.exif
    }

    /// GPS IFD entry, if present
    pub fn gps(&self, tag: u16) -> Option<&EntryData> {
        self.exif.gps()?.entry(tag)
    }

    pub fn set_gps(&mut self, tag: u16, data: EntryData) {
        self.exif.gps_mut().set(tag, data);
        self.exif_dirty = true;
    }

    /// Attitude property as stored, e.g. `"123.1"`
    pub fn attitude(&self, name: &str) -> Option<&str> {
        self.attitude.get(name).map(String::as_str)
    }

    pub fn set_attitude(&mut self, name: &str, value: String) {
        self.attitude.insert(name.to_owned(), value);
        self.attitude_dirty = true;
    }

    /// Write changed blocks back into the image segments. Untouched blocks
    /// keep their original bytes.
    pub fn store(&self, jpeg: &mut JpegFile) -> Result<()> {
        if self.exif_dirty {
            jpeg.set_exif(&self.exif.to_bytes()?)?;
        }
        if self.attitude_dirty {
            let packet = xmp::write_properties(jpeg.xmp(), xmp::ATTITUDE_URI, &self.attitude)?;
            jpeg.set_xmp(&packet)?;
        }
        debug!(exif = self.exif_dirty, xmp = self.attitude_dirty, "stored metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::tests::tiny_jpeg;
    use crate::tag;

    #[test]
    fn empty_image_has_no_fields() {
        let jpeg = JpegFile::from_bytes(&tiny_jpeg()).unwrap();
        let meta = Metadata::load(&jpeg).unwrap();

        assert!(meta.gps(tag::gps::LATITUDE).is_none());
        assert!(meta.attitude(xmp::ROLL).is_none());
    }

    #[test]
    fn unchanged_metadata_leaves_image_untouched() {
        let bytes = tiny_jpeg();
        let mut jpeg = JpegFile::from_bytes(&bytes).unwrap();
        Metadata::load(&jpeg).unwrap().store(&mut jpeg).unwrap();

        assert_eq!(jpeg.to_bytes(), bytes);
    }

    #[test]
    fn merged_fields_survive_store_and_load() {
        xmp::register_attitude_namespace().unwrap();
        let mut jpeg = JpegFile::from_bytes(&tiny_jpeg()).unwrap();

        let mut meta = Metadata::load(&jpeg).unwrap();
        meta.set_gps(tag::gps::LATITUDE_REF, EntryData::Ascii("S".into()));
        meta.set_attitude(xmp::YAW, "103.23".into());
        meta.store(&mut jpeg).unwrap();

        let reloaded = Metadata::load(&JpegFile::from_bytes(&jpeg.to_bytes()).unwrap()).unwrap();
        assert_eq!(reloaded.gps(tag::gps::LATITUDE_REF), Some(&EntryData::Ascii("S".into())));
        assert_eq!(reloaded.attitude(xmp::YAW), Some("103.23"));
    }
}
