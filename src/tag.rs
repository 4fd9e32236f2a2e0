// only the tags this crate reads, writes or has to carry across a rewrite

pub const EXIF_IFD_POINTER: u16 = 0x8769;
pub const GPS_INFO_IFD_POINTER: u16 = 0x8825;
pub const INTEROPERABILITY_IFD_POINTER: u16 = 0xa005;
pub const JPEG_THUMBNAIL_OFFSET: u16 = 0x0201;
pub const JPEG_THUMBNAIL_LENGTH: u16 = 0x0202;

/// true for tags whose value is an offset to a child IFD
pub fn is_ifd_pointer(tag: u16) -> bool {
    matches!(tag, EXIF_IFD_POINTER | GPS_INFO_IFD_POINTER | INTEROPERABILITY_IFD_POINTER)
}

pub mod gps {
    pub const VERSION_ID: u16 = 0x0000;
    pub const LATITUDE_REF: u16 = 0x0001;
    pub const LATITUDE: u16 = 0x0002;
    pub const LONGITUDE_REF: u16 = 0x0003;
    pub const LONGITUDE: u16 = 0x0004;
    pub const ALTITUDE_REF: u16 = 0x0005;
    pub const ALTITUDE: u16 = 0x0006;
    pub const IMG_DIRECTION: u16 = 0x0011;

    /// GPSVersionID written into freshly created GPS IFDs
    pub const VERSION: [u8; 4] = [2, 2, 0, 0];
}
