//! # DICOM gray16 library
//!
//! This crate decodes single DICOM slices into a canonical 16-bit grayscale
//! raster, keeps a sidecar cache of that raster next to the source file for
//! fast reloads, and renders it with windowing and color lookup.
//!
//! Uncompressed data sets are supported in Implicit VR Little Endian,
//! Explicit VR Little Endian and Explicit VR Big Endian. Compressed transfer
//! syntaxes and directory records (DICOMDIR) are rejected before their data
//! set is read. DICOM files are assumed to have the following attributes:
//!  - One sample per pixel (grayscale) with 8 or 16 bits allocated
//!  - No multiframe (always the first frame is used)
//!
//! Loads and bulk caching run on blocking Tokio workers and report their
//! progress as a stream of [`PipelineMessage`]s:
//!  - a cache hit finishes silently
//!  - a cache miss (or a corrupt cache) is decoded, announced with
//!    `Started` and written back to the cache
//!  - running out of memory is reported apart from every other failure
//!
//! Cache files are never checked against their source: a cache stays valid
//! until it is removed with [`clear_cache`] or [`remove_cache`].
//!
//! # Roadmap
//!
//!  - Multiframe support
//!  - Decoding of compressed transfer syntaxes
//!  - Source fingerprints in the cache header
//!
//! # Examples
//!
//! ## Loading a slice and saving it as PNG
//!
//! Load a file through the pipeline (cache first), then render it with the
//! CT lung window.
//!
//! ```no_run
//! # use dicom_gray16::{ClutMode, Pipeline, PipelineMessage, WindowLevel, WindowPreset, render};
//! # async fn run() {
//! let pipeline = Pipeline::default();
//! let mut handle = pipeline.load("dicom/slice.dcm");
//! while let Some(message) = handle.next_message().await {
//!     if let PipelineMessage::Finished { image: Some(image) } = message {
//!         let window = WindowLevel::from(WindowPreset::CtLung);
//!         render(&image, Some(window), ClutMode::Normal)
//!             .expect("should have rendered the image")
//!             .save("result.png")
//!             .expect("should have saved the image");
//!     }
//! }
//! # }
//! ```

pub mod cache;
pub mod canonical;
pub mod config;
pub mod decoder;
pub mod display;
pub mod element;
pub mod enums;
pub mod error;
pub mod meta;
pub mod pipeline;
#[cfg(test)]
mod test_support;

pub use cache::{clear_cache, count_cached, remove_cache};
pub use canonical::{CanonicalImage, Rescale};
pub use config::PipelineConfig;
pub use decoder::{DicomDecoder, DicomObject, ElementDescription};
pub use display::{OrientationLabels, WindowLevel, render};
pub use element::{DicomElement, tag_name};
pub use enums::{ClutMode, WindowPreset};
pub use error::{Error, Result};
pub use meta::{MetaInformation, TransferSyntax};
pub use pipeline::{
    LoadState, Pipeline, PipelineHandle, PipelineMessage, RequestState, SessionError,
    ViewerSession, list_candidates,
};
