//! Read and write GPS geotags (position, altitude, heading) and camera
//! attitude (roll, pitch, yaw) in JPEG images.
//!
//! GPS values live in the EXIF GPS IFD, attitude values in a custom XMP
//! namespace. The crate root holds the TIFF/IFD codec used for the EXIF
//! block; see [`geotag`] for the high level entry points.

pub mod coord;
pub mod error;
pub mod geotag;
pub mod jpeg;
pub mod metadata;
pub mod rational;
pub mod tag;
pub mod xmp;

pub use coord::{AltitudeRef, Axis};
pub use error::{Error, Result};
pub use geotag::{
    apply_geo_tag, read_geo_tag, read_geo_tag_with, read_metadata, write_geo_tag, GeoTag,
    GeoTagRecord, ReadOptions,
};
pub use jpeg::JpegFile;
pub use metadata::Metadata;
pub use rational::{Rational, SRational};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};
use tracing::debug;

// a single entry can never exceed the 64k APP1 segment holding it
const MAX_ENTRY_SZ: usize = 1 << 16;
const MAX_IFD_DEPTH: usize = 4;
const MAX_IFDS: usize = 8;

/// top level data structure representing an entire exif document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Exif {
    pub ifds: Vec<Ifd>,
    /// JPEG thumbnail referenced from IFD1, carried across re-encoding
    pub thumbnail: Option<Vec<u8>>,
}

// io::Cursor only tracks a position for in-memory buffers
struct PosWriter<T> {
    inner: T,
    pos: u64,
}

impl<T: Write + Seek> PosWriter<T> {
    fn new(inner: T) -> Self {
        PosWriter { inner, pos: 0 }
    }

    fn position(&self) -> u64 {
        self.pos
    }

    /// overwrite a u32 previously written as a placeholder
    fn patch_u32<B: ByteOrder>(&mut self, at: u64, value: u64) -> Result<()> {
        let value = u32::try_from(value).map_err(|_| Error::malformed("exif offset exceeds 4GiB"))?;
        let cur = self.pos;
        self.seek(SeekFrom::Start(at))?;
        self.write_u32::<B>(value)?;
        self.seek(SeekFrom::Start(cur))?;
        Ok(())
    }

    /// TIFF offsets must be word aligned
    fn align(&mut self) -> io::Result<()> {
        if self.pos % 2 == 1 {
            self.write_all(&[0])?;
        }
        Ok(())
    }
}

impl<T: Write> Write for PosWriter<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Seek> Seek for PosWriter<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let n = self.inner.seek(pos)?;
        self.pos = n;
        Ok(n)
    }
}

impl Exif {
    /// extract Exif from the given reader, positioned at the TIFF header
    pub fn new<R: Read + Seek>(rdr: &mut R) -> Result<Self> {
        let mut header = [0u8; 8];
        rdr.read_exact(&mut header)?;

        let big_endian = match (header[0], header[1]) {
            (b'M', b'M') => true,
            (b'I', b'I') => false,
            _ => return Err(Error::malformed("invalid endianness marker")),
        };

        if big_endian {
            Self::decode::<_, BigEndian>(rdr, &header)
        } else {
            Self::decode::<_, LittleEndian>(rdr, &header)
        }
    }

    /// decode an Exif from an in-memory TIFF block
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::new(&mut Cursor::new(data))
    }

    fn decode<R: Read + Seek, B: ByteOrder>(rdr: &mut R, header: &[u8; 8]) -> Result<Self> {
        if B::read_u16(&header[2..]) != 42 {
            return Err(Error::malformed("invalid tiff magic"));
        }

        let mut offset = B::read_u32(&header[4..]);
        let mut visited = vec![];
        let mut ifds = vec![];
        while offset != 0 {
            if visited.contains(&offset) || ifds.len() >= MAX_IFDS {
                return Err(Error::malformed("ifd chain loops"));
            }
            visited.push(offset);

            rdr.seek(SeekFrom::Start(offset as u64))?;
            let (ifd, next) = Ifd::new::<_, B>(rdr, ifds.len() as u16, 0)?;
            ifds.push(ifd);
            offset = next;
        }

        let thumbnail = match ifds.get(1) {
            Some(ifd1) => read_thumbnail(rdr, ifd1)?,
            None => None,
        };

        Ok(Exif { ifds, thumbnail })
    }

    /// Write this Exif to the given writer. Output is always little endian.
    pub fn encode<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        const HEADER: [u8; 8] = [b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];

        let mut pw = PosWriter::new(w);
        pw.write_all(&HEADER)?;

        if self.ifds.is_empty() {
            return Ifd::new_empty(0).encode::<_, LittleEndian>(&mut pw, true, None);
        }

        for (n, ifd) in self.ifds.iter().enumerate() {
            let thumbnail = if n == 1 { self.thumbnail.as_deref() } else { None };
            ifd.encode::<_, LittleEndian>(&mut pw, n == self.ifds.len() - 1, thumbnail)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(vec![]);
        self.encode(&mut buf)?;
        Ok(buf.into_inner())
    }

    /// the GPS IFD hanging off IFD0, if any
    pub fn gps(&self) -> Option<&Ifd> {
        self.ifds.first()?.child(tag::GPS_INFO_IFD_POINTER)
    }

    /// the GPS IFD, creating IFD0 and the GPS IFD if needed
    pub fn gps_mut(&mut self) -> &mut Ifd {
        if self.ifds.is_empty() {
            self.ifds.push(Ifd::new_empty(0));
        }
        let gps = self.ifds[0].child_or_insert(tag::GPS_INFO_IFD_POINTER);
        if gps.entry(tag::gps::VERSION_ID).is_none() {
            gps.set(tag::gps::VERSION_ID, EntryData::Byte(tag::gps::VERSION.to_vec()));
        }
        gps
    }
}

fn read_thumbnail<R: Read + Seek>(rdr: &mut R, ifd1: &Ifd) -> Result<Option<Vec<u8>>> {
    let offset = ifd1.entry(tag::JPEG_THUMBNAIL_OFFSET).and_then(EntryData::first_u32);
    let length = ifd1.entry(tag::JPEG_THUMBNAIL_LENGTH).and_then(EntryData::first_u32);

    match (offset, length) {
        (Some(offset), Some(length)) if length > 0 && (length as usize) <= MAX_ENTRY_SZ => {
            let mut buf = vec![0u8; length as usize];
            rdr.seek(SeekFrom::Start(offset as u64))?;
            rdr.read_exact(&mut buf)?;
            Ok(Some(buf))
        }
        _ => Ok(None),
    }
}

/// Image file directory - container for a collection of Entries
#[derive(Clone, Debug, PartialEq)]
pub struct Ifd {
    pub id: u16,
    pub entries: Vec<Entry>,
    pub children: Vec<Ifd>,
}

impl Ifd {
    pub fn new_empty(id: u16) -> Self {
        Ifd { id, entries: vec![], children: vec![] }
    }

    fn new<R: Read + Seek, B: ByteOrder>(
        rdr: &mut R,
        id: u16,
        depth: usize,
    ) -> Result<(Self, u32)> {
        if depth > MAX_IFD_DEPTH {
            return Err(Error::malformed("sub-ifds nested too deeply"));
        }

        let num_headers = rdr.read_u16::<B>()?;

        let mut children = vec![];
        let mut entries = vec![];

        // headers are contiguous, followed by offset_to_next_ifd and entry data
        let mut hdrs = vec![];
        for _ in 0..num_headers {
            hdrs.push(EntryHeader::decode::<_, B>(rdr)?);
        }

        let offset_to_next_ifd = rdr.read_u32::<B>()?;

        for h in &hdrs {
            match (h.tag, &h.offset_val) {
                // follow known pointers to generate SubIFDs
                (t, OffsetValue::Value(v)) if tag::is_ifd_pointer(t) => {
                    let off = B::read_u32(v);
                    rdr.seek(SeekFrom::Start(off as u64))?;
                    let (ifd, _) = Ifd::new::<_, B>(rdr, t, depth + 1)?;
                    children.push(ifd);
                }
                _ => match Entry::from_header::<_, B>(rdr, h)? {
                    Some(e) => entries.push(e),
                    None => {
                        debug!(tag = h.tag, format = h.format, "skipping entry with unknown format")
                    }
                },
            }
        }

        Ok((Ifd { id, entries, children }, offset_to_next_ifd))
    }

    pub fn entry(&self, tag: u16) -> Option<&EntryData> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| &e.data)
    }

    /// insert or replace the entry for `tag`, keeping tag order
    pub fn set(&mut self, tag: u16, data: EntryData) {
        match self.entries.iter_mut().find(|e| e.tag == tag) {
            Some(e) => e.data = data,
            None => {
                let idx =
                    self.entries.iter().position(|e| e.tag > tag).unwrap_or(self.entries.len());
                self.entries.insert(idx, Entry { tag, data });
            }
        }
    }

    pub fn child(&self, id: u16) -> Option<&Ifd> {
        self.children.iter().find(|c| c.id == id)
    }

    pub fn child_or_insert(&mut self, id: u16) -> &mut Ifd {
        let idx = match self.children.iter().position(|c| c.id == id) {
            Some(idx) => idx,
            None => {
                self.children.push(Ifd::new_empty(id));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    /// similar to Entry::encode_header(), but the offset to the subIFD
    /// is encoded in the ULong immediate
    fn encode_subifd_header<W: Write, B: ByteOrder>(
        &self,
        pw: &mut PosWriter<W>,
        data_offset: u32,
    ) -> Result<()> {
        pw.write_u16::<B>(self.id)?;
        pw.write_u16::<B>(4)?; // ULong
        pw.write_u32::<B>(1)?;
        pw.write_u32::<B>(data_offset)?;
        Ok(())
    }

    fn encode<W: Write + Seek, B: ByteOrder>(
        &self,
        pw: &mut PosWriter<W>,
        last: bool,
        thumbnail: Option<&[u8]>,
    ) -> Result<()> {
        const IFD_HEADER_LEN: u64 = 12;
        const NEXT_IFD_PTR_LEN: u64 = 4;
        const VALUE_FIELD: u64 = 8;

        // readers expect entries in ascending tag order
        let mut items: Vec<(u16, Option<&Entry>, Option<&Ifd>)> = self
            .entries
            .iter()
            .map(|e| (e.tag, Some(e), None))
            .chain(self.children.iter().map(|c| (c.id, None, Some(c))))
            .collect();
        items.sort_by_key(|(tag, _, _)| *tag);

        let num_headers =
            u16::try_from(items.len()).map_err(|_| Error::malformed("too many ifd entries"))?;
        pw.write_u16::<B>(num_headers)?;

        // data segment for this IFD starts here
        let mut data_offset =
            pw.position() + items.len() as u64 * IFD_HEADER_LEN + NEXT_IFD_PTR_LEN;

        let mut offset_data_entries = vec![];
        let mut child_ptrs = vec![];
        let mut thumbnail_ptr = None;

        for (t, entry, child) in items {
            let at = pw.position();
            if let Some(e) = entry {
                let offset = u32::try_from(data_offset)
                    .map_err(|_| Error::malformed("exif offset exceeds 4GiB"))?;
                if e.encode_header::<_, B>(pw, offset)? {
                    data_offset += e.data.padded_sz() as u64;
                    offset_data_entries.push(e);
                }
                if t == tag::JPEG_THUMBNAIL_OFFSET {
                    thumbnail_ptr = Some(at + VALUE_FIELD);
                }
            }
            if let Some(c) = child {
                // real offset is known once the data segment is written
                c.encode_subifd_header::<_, B>(pw, 0)?;
                child_ptrs.push((c, at + VALUE_FIELD));
            }
        }

        let next_offset_pos = pw.position();
        pw.write_u32::<B>(0u32)?; // placeholder

        for e in offset_data_entries {
            e.data.encode_offset_data::<_, B>(pw)?;
            pw.align()?;
        }

        for (c, ptr) in child_ptrs {
            let start = pw.position();
            pw.patch_u32::<B>(ptr, start)?;
            c.encode::<_, B>(pw, true, None)?;
        }

        if let (Some(ptr), Some(t)) = (thumbnail_ptr, thumbnail) {
            let start = pw.position();
            pw.patch_u32::<B>(ptr, start)?;
            pw.write_all(t)?;
            pw.align()?;
        }

        if !last {
            let cur_pos = pw.position();
            pw.patch_u32::<B>(next_offset_pos, cur_pos)?;
        }

        Ok(())
    }
}

#[derive(Debug)]
enum OffsetValue {
    Offset(u32),
    Value(Vec<u8>),
}

#[derive(Debug)]
struct EntryHeader {
    tag: u16,
    format: u16,
    count: u32,
    offset_val: OffsetValue,
}

impl EntryHeader {
    fn decode<R: Read, B: ByteOrder>(rdr: &mut R) -> Result<Self> {
        let tag = rdr.read_u16::<B>()?;
        let fmt = rdr.read_u16::<B>()?;
        let n = rdr.read_u32::<B>()?;

        // if all the data fits into 4 bytes, expect an OffsetValue::Value encoded immediately,
        // otherwise expect an OffsetValue::Offset to the data
        let ov = if Self::datatype_sz(fmt).saturating_mul(n as usize) <= 4 {
            let mut buf = vec![0u8; 4];
            rdr.read_exact(&mut buf)?;
            OffsetValue::Value(buf)
        } else {
            OffsetValue::Offset(rdr.read_u32::<B>()?)
        };

        Ok(EntryHeader { tag, format: fmt, count: n, offset_val: ov })
    }

    fn datatype_sz(dt: u16) -> usize {
        match dt {
            1 /*Byte*/ | 2 /*Ascii*/ | 6 /*SignedByte*/ | 7 /*Undef*/ => 1,
            3 /*UShort*/ | 8 /*SShort*/ => 2,
            4 /*ULong*/ | 9 /*SLong*/ | 11 /*Float32*/ => 4,
            5 /*URational*/ | 10 /*SRational*/ | 12 /*Float64*/ => 8,
            _ => 0,
        }
    }

    fn data_sz(&self) -> usize {
        Self::datatype_sz(self.format).saturating_mul(self.count as usize)
    }
}

/// individual entry within an IFD
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub tag: u16,
    pub data: EntryData,
}

impl Entry {
    fn from_header<R: Read + Seek, B: ByteOrder>(
        rdr: &mut R,
        h: &EntryHeader,
    ) -> Result<Option<Self>> {
        Ok(EntryData::from_header::<_, B>(rdr, h)?.map(|data| Entry { tag: h.tag, data }))
    }

    /// encode the header portion of this entry,
    /// return true if data must subsequently be written into the data segment
    fn encode_header<W: Write, B: ByteOrder>(&self, w: &mut W, data_offset: u32) -> Result<bool> {
        w.write_u16::<B>(self.tag)?;
        w.write_u16::<B>(self.data.format_code())?;
        w.write_u32::<B>(self.data.len() as u32)?;

        if self.data.total_sz() > 4 {
            w.write_u32::<B>(data_offset)?;
            Ok(true)
        } else {
            self.data.encode_offset_data::<_, B>(w)?;
            // immediate data must be padded to 4 bytes
            let pad = 4 - self.data.total_sz();
            w.write_all(&[0u8; 4][..pad])?;
            Ok(false)
        }
    }
}

/// Data associated with an Entry
#[derive(Clone, Debug, PartialEq)]
pub enum EntryData {
    Byte(Vec<u8>),
    Ascii(String),
    UShort(Vec<u16>),
    ULong(Vec<u32>),
    URational(Vec<Rational>),
    SignedByte(Vec<i8>),
    Undef(Vec<u8>), // or vendor specific
    SShort(Vec<i16>),
    SLong(Vec<i32>),
    SRational(Vec<SRational>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl EntryData {
    fn item_sz(&self) -> usize {
        use self::EntryData::*;
        match *self {
            Byte(_) | Ascii(_) | SignedByte(_) | Undef(_) => 1,
            UShort(_) | SShort(_) => 2,
            ULong(_) | SLong(_) | Float32(_) => 4,
            URational(_) | SRational(_) | Float64(_) => 8,
        }
    }

    fn len(&self) -> usize {
        use self::EntryData::*;
        match self {
            Byte(v) | Undef(v) => v.len(),
            Ascii(v) => v.len() + 1,
            UShort(v) => v.len(),
            ULong(v) => v.len(),
            URational(v) => v.len(),
            SignedByte(v) => v.len(),
            SShort(v) => v.len(),
            SLong(v) => v.len(),
            SRational(v) => v.len(),
            Float32(v) => v.len(),
            Float64(v) => v.len(),
        }
    }

    fn total_sz(&self) -> usize {
        self.item_sz() * self.len()
    }

    fn padded_sz(&self) -> usize {
        let sz = self.total_sz();
        sz + sz % 2
    }

    fn format_code(&self) -> u16 {
        use self::EntryData::*;
        match *self {
            Byte(_) => 1,
            Ascii(_) => 2,
            UShort(_) => 3,
            ULong(_) => 4,
            URational(_) => 5,
            SignedByte(_) => 6,
            Undef(_) => 7,
            SShort(_) => 8,
            SLong(_) => 9,
            SRational(_) => 10,
            Float32(_) => 11,
            Float64(_) => 12,
        }
    }

    pub fn as_rationals(&self) -> Option<&[Rational]> {
        match self {
            EntryData::URational(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            EntryData::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// first element of an integer-ish entry, for single byte flags
    pub fn first_u8(&self) -> Option<u8> {
        match self {
            EntryData::Byte(v) | EntryData::Undef(v) => v.first().copied(),
            EntryData::UShort(v) => v.first().and_then(|&n| u8::try_from(n).ok()),
            EntryData::ULong(v) => v.first().and_then(|&n| u8::try_from(n).ok()),
            _ => None,
        }
    }

    pub fn first_u32(&self) -> Option<u32> {
        match self {
            EntryData::ULong(v) => v.first().copied(),
            EntryData::UShort(v) => v.first().map(|&n| n as u32),
            _ => None,
        }
    }

    fn from_header<R: Read + Seek, B: ByteOrder>(
        rdr: &mut R,
        h: &EntryHeader,
    ) -> Result<Option<Self>> {
        if EntryHeader::datatype_sz(h.format) == 0 {
            return Ok(None);
        }
        if h.data_sz() > MAX_ENTRY_SZ {
            let msg = format!("entry 0x{:04x} claims {} bytes", h.tag, h.data_sz());
            return Err(Error::malformed(msg));
        }

        let d = match h.offset_val {
            // immediates are always 4 bytes wide, keep only the used part
            OffsetValue::Value(ref v) => v[..h.data_sz()].to_vec(),
            OffsetValue::Offset(o) => {
                let mut v = vec![0u8; h.data_sz()];
                rdr.seek(SeekFrom::Start(o as u64))?;
                rdr.read_exact(&mut v)?;
                v
            }
        };

        let n = h.count as usize;
        let mut c = Cursor::new(&d);
        let data = match h.format {
            1 => EntryData::Byte(d.clone()),
            2 => {
                // tolerate writers that drop the terminator
                let end = d.iter().position(|&c| c == 0).unwrap_or(d.len());
                EntryData::Ascii(String::from_utf8_lossy(&d[..end]).into_owned())
            }
            3 => EntryData::UShort(read_n(n, || c.read_u16::<B>())?),
            4 => EntryData::ULong(read_n(n, || c.read_u32::<B>())?),
            5 => EntryData::URational(read_n(n, || {
                Ok(Rational::new(c.read_u32::<B>()?, c.read_u32::<B>()?))
            })?),
            6 => EntryData::SignedByte(d.iter().map(|&b| b as i8).collect()),
            7 => EntryData::Undef(d.clone()),
            8 => EntryData::SShort(read_n(n, || c.read_i16::<B>())?),
            9 => EntryData::SLong(read_n(n, || c.read_i32::<B>())?),
            10 => EntryData::SRational(read_n(n, || {
                Ok(SRational::new(c.read_i32::<B>()?, c.read_i32::<B>()?))
            })?),
            11 => EntryData::Float32(read_n(n, || c.read_f32::<B>())?),
            12 => EntryData::Float64(read_n(n, || c.read_f64::<B>())?),
            _ => return Ok(None),
        };
        Ok(Some(data))
    }

    // header portion has already been written, just write data segment
    fn encode_offset_data<W: Write, B: ByteOrder>(&self, w: &mut W) -> Result<()> {
        use self::EntryData::*;
        match self {
            Byte(v) | Undef(v) => w.write_all(v)?,
            Ascii(v) => {
                w.write_all(v.as_bytes())?;
                w.write_all(b"\0")?;
            }
            UShort(v) => for d in v { w.write_u16::<B>(*d)?; },
            ULong(v) => for d in v { w.write_u32::<B>(*d)?; },
            URational(v) => for r in v {
                w.write_u32::<B>(r.num)?;
                w.write_u32::<B>(r.denom)?;
            },
            SignedByte(v) => {
                let vb = v.iter().map(|&b| b as u8).collect::<Vec<u8>>();
                w.write_all(&vb)?
            }
            SShort(v) => for d in v { w.write_i16::<B>(*d)?; },
            SLong(v) => for d in v { w.write_i32::<B>(*d)?; },
            SRational(v) => for r in v {
                w.write_i32::<B>(r.num)?;
                w.write_i32::<B>(r.denom)?;
            },
            Float32(v) => for d in v { w.write_f32::<B>(*d)?; },
            Float64(v) => for d in v { w.write_f64::<B>(*d)?; },
        }

        Ok(())
    }
}

fn read_n<T, F: FnMut() -> io::Result<T>>(n: usize, mut f: F) -> io::Result<Vec<T>> {
    let mut v = Vec::with_capacity(n);
    for _ in 0..n {
        v.push(f()?);
    }
    Ok(v)
}
