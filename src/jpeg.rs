// http://vip.sugovica.hu/Sardi/kepnezo/JPEG%20File%20Layout%20and%20Format.htm
// https://www.imperialviolet.org/binary/jpeg/
// http://dev.exiv2.org/projects/exiv2/wiki/The_Metadata_in_JPEG_files

use std::fs::{self, File};
use std::io;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const EXIF_HEADER: &[u8] = b"Exif\0\0";
pub const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

// segment length field counts itself
const MAX_PAYLOAD: usize = 0xFFFF - 2;

/// A marker segment preceding the image scan.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub marker: u8,
    pub data: Vec<u8>,
}

impl Segment {
    fn is_app1_with(&self, header: &[u8]) -> bool {
        self.marker == APP1 && self.data.starts_with(header)
    }
}

/// A JPEG split into its header segments and the untouched scan data.
///
/// The file is read fully on open and closed straight away; nothing on disk
/// changes until [`JpegFile::persist`].
#[derive(Clone, Debug)]
pub struct JpegFile {
    path: Option<PathBuf>,
    segments: Vec<Segment>,
    /// everything from the SOS marker (or a premature EOI) to end of file
    scan: Vec<u8>,
}

impl JpegFile {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path)?;
        let mut jpeg = Self::from_reader(&mut BufReader::new(f))?;
        jpeg.path = Some(path.to_owned());
        Ok(jpeg)
    }

    pub fn from_reader<R: Read>(rdr: &mut R) -> Result<Self> {
        let mut soi = [0u8; 2];
        match rdr.read_exact(&mut soi) {
            Ok(()) if soi == [0xFF, SOI] => {}
            Ok(()) => {
                return Err(Error::UnsupportedFormat("missing JPEG start of image marker".into()))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::UnsupportedFormat("file too short to be a JPEG".into()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut segments = vec![];
        let scan = loop {
            // find next segment marker
            if 0xFF != rdr.read_u8().map_err(truncated)? {
                return Err(Error::malformed("couldn't find segment marker"));
            }

            let mut seg_id = rdr.read_u8().map_err(truncated)?;
            // markers may be preceded by any number of fill bytes
            while seg_id == 0xFF {
                seg_id = rdr.read_u8().map_err(truncated)?;
            }

            match seg_id {
                0x00 | 0x01 | SOI => {}     // byte stuffing, TEM, stray SOI
                0xD0..=0xD7 => {}           // restart markers carry no length
                SOS | EOI => {
                    let mut rest = vec![0xFF, seg_id];
                    rdr.read_to_end(&mut rest)?;
                    break rest;
                }
                marker => {
                    let len = rdr.read_u16::<BigEndian>().map_err(truncated)? as usize;
                    if len < 2 {
                        let msg = format!("segment 0x{:02x} has length {}", marker, len);
                        return Err(Error::malformed(msg));
                    }
                    let mut data = vec![0u8; len - 2];
                    rdr.read_exact(&mut data).map_err(truncated)?;
                    segments.push(Segment { marker, data });
                }
            }
        };

        let jpeg = JpegFile { path: None, segments, scan };
        debug!(
            segments = jpeg.segments.len(),
            exif = jpeg.exif().is_some(),
            xmp = jpeg.xmp().is_some(),
            "parsed jpeg"
        );
        Ok(jpeg)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_reader(&mut io::Cursor::new(data))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// TIFF block of the EXIF APP1 segment
    pub fn exif(&self) -> Option<&[u8]> {
        self.app1_payload(EXIF_HEADER)
    }

    /// XML packet of the XMP APP1 segment
    pub fn xmp(&self) -> Option<&[u8]> {
        self.app1_payload(XMP_HEADER)
    }

    pub fn set_exif(&mut self, tiff: &[u8]) -> Result<()> {
        self.set_app1(EXIF_HEADER, tiff)
    }

    pub fn set_xmp(&mut self, packet: &[u8]) -> Result<()> {
        self.set_app1(XMP_HEADER, packet)
    }

    fn app1_payload(&self, header: &[u8]) -> Option<&[u8]> {
        self.segments
            .iter()
            .find(|s| s.is_app1_with(header))
            .map(|s| &s.data[header.len()..])
    }

    /// Replace the APP1 segment tagged with `header`, or insert one after any
    /// JFIF header (and after the EXIF segment for XMP).
    fn set_app1(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(header.len() + body.len());
        data.extend_from_slice(header);
        data.extend_from_slice(body);
        if data.len() > MAX_PAYLOAD {
            return Err(Error::malformed(format!(
                "{} byte payload does not fit in an APP1 segment",
                data.len()
            )));
        }

        let seg = Segment { marker: APP1, data };
        if let Some(existing) = self.segments.iter_mut().find(|s| s.is_app1_with(header)) {
            *existing = seg;
            return Ok(());
        }

        let mut idx = self.segments.iter().take_while(|s| s.marker == APP0).count();
        if header != EXIF_HEADER {
            if let Some(exif_idx) = self.segments.iter().position(|s| s.is_app1_with(EXIF_HEADER)) {
                idx = exif_idx + 1;
            }
        }
        self.segments.insert(idx, seg);
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[0xFF, SOI])?;
        for s in &self.segments {
            w.write_all(&[0xFF, s.marker])?;
            w.write_u16::<BigEndian>((s.data.len() + 2) as u16)?;
            w.write_all(&s.data)?;
        }
        w.write_all(&self.scan)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Write back to the file this was opened from.
    pub fn persist(&self) -> Result<()> {
        match self.path {
            Some(ref path) => self.save_as(path),
            None => Err(Error::Persistence {
                path: PathBuf::new(),
                source: io::Error::new(io::ErrorKind::NotFound, "image was not opened from a file"),
            }),
        }
    }

    /// Write to `path` through a sibling temporary file, so a failed save
    /// never leaves a truncated image behind.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut tmp_name = path.file_name().unwrap_or_default().to_owned();
        tmp_name.push(".geotag-tmp");
        let tmp = path.with_file_name(tmp_name);

        let res = (|| {
            let mut w = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut w)?;
            let file = w.into_inner().map_err(|e| e.into_error())?;
            if let Ok(existing) = fs::metadata(path) {
                file.set_permissions(existing.permissions())?;
            }
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();

        res.map_err(|source| {
            let _ = fs::remove_file(&tmp);
            Error::Persistence { path: path.to_owned(), source }
        })
    }
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::malformed("jpeg ends before the image scan")
    } else {
        e.into()
    }
}
