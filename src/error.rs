use std::{error::Error as StdError, fmt::Write, io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed DICOM header: {0}")]
    MalformedHeader(String),

    #[error("Unexpected end of DICOM stream")]
    TruncatedStream,

    #[error("Unsupported DICOM object: {0}")]
    UnsupportedObject(String),

    #[error("Compressed transfer syntax {0} is not supported")]
    UnsupportedCompression(String),

    #[error("Invalid dimensions {width}x{height} for {len} pixels")]
    InvalidDimensions {
        width: u32,
        height: u32,
        len: usize,
    },

    #[error("No cached image at {}", .0.display())]
    CacheMiss(PathBuf),

    #[error("Corrupt image cache: {0}")]
    CorruptCache(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Out of memory while allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable reason text carried by pipeline failure messages.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Whether a cache read failure means "go decode the source instead".
    pub fn is_cache_fallthrough(&self) -> bool {
        matches!(self, Error::CacheMiss(_) | Error::CorruptCache(_))
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }

    /// Reclassify premature EOF from a DICOM source as a truncated stream.
    pub(crate) fn from_dicom_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedStream
        } else {
            Error::Io(err)
        }
    }

    /// Classify a failure of the DICOM parsing stack. An I/O error anywhere
    /// in its source chain decides the variant, anything else is malformed.
    pub(crate) fn from_parser<E: StdError + 'static>(err: E) -> Self {
        let mut message = err.to_string();
        let mut cause: Option<&(dyn StdError + 'static)> = Some(&err);
        while let Some(current) = cause {
            if let Some(io_err) = current.downcast_ref::<io::Error>() {
                return Error::from_dicom_io(io::Error::new(io_err.kind(), message));
            }
            cause = current.source();
            if let Some(next) = cause {
                let _ = write!(message, ": {next}");
            }
        }
        Error::MalformedHeader(message)
    }
}

/// Reserve room for `len` elements, reporting allocation failure as
/// [`Error::OutOfMemory`] instead of aborting.
pub(crate) fn try_alloc<T: Default + Clone>(len: usize, budget: Option<usize>) -> Result<Vec<T>> {
    let bytes = len.saturating_mul(std::mem::size_of::<T>());
    if budget.is_some_and(|max| bytes > max) {
        return Err(Error::OutOfMemory { bytes });
    }
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory { bytes })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
