use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{field} out of range: {value}")]
    Range { field: &'static str, value: f64 },
    #[error("invalid {field} reference {reference:?}")]
    InvalidReference { field: &'static str, reference: String },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to save '{}': {}", path.display(), source)]
    Persistence { path: PathBuf, source: io::Error },
    #[error("malformed metadata: {0}")]
    Malformed(String),
    #[error("namespace '{prefix}' cannot be bound to '{uri}'")]
    Namespace { prefix: String, uri: String },
    #[error("xmp packet: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::Malformed(msg.into())
    }
}
