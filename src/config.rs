use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

pub const DEFAULT_CACHE_EXTENSION: &str = "imgcache";
pub const DEFAULT_DICOM_EXTENSION: &str = "dcm";

/// Settings shared by the decoder, the cache codec and the pipeline workers.
///
/// ```
/// # use dicom_gray16::PipelineConfig;
/// let config = PipelineConfig::new()
///     .with_cache_extension("g16")
///     .with_max_pixel_bytes(64 * 1024 * 1024);
/// assert_eq!(config.cache_extension(), "g16");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    cache_extension: String,
    dicom_extension: String,
    max_pixel_bytes: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_extension: DEFAULT_CACHE_EXTENSION.to_string(),
            dicom_extension: DEFAULT_DICOM_EXTENSION.to_string(),
            max_pixel_bytes: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extension appended to a source path to name its sidecar cache file
    pub fn with_cache_extension(mut self, extension: impl Into<String>) -> Self {
        self.cache_extension = extension.into();
        self
    }

    pub fn with_dicom_extension(mut self, extension: impl Into<String>) -> Self {
        self.dicom_extension = extension.into();
        self
    }

    /// Upper bound on a single pixel buffer. Larger images fail exactly as
    /// if the allocation itself had failed.
    pub fn with_max_pixel_bytes(mut self, bytes: usize) -> Self {
        self.max_pixel_bytes = Some(bytes);
        self
    }

    pub fn cache_extension(&self) -> &str {
        &self.cache_extension
    }

    pub fn dicom_extension(&self) -> &str {
        &self.dicom_extension
    }

    pub fn max_pixel_bytes(&self) -> Option<usize> {
        self.max_pixel_bytes
    }

    /// Sidecar location for `source`: the full source path plus the cache
    /// extension (`scan.dcm` becomes `scan.dcm.imgcache`).
    pub fn cache_path(&self, source: impl AsRef<Path>) -> PathBuf {
        let mut name: OsString = source.as_ref().as_os_str().to_owned();
        name.push(".");
        name.push(&self.cache_extension);
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_appends_extension() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.cache_path("/data/ct/slice.dcm"),
            PathBuf::from("/data/ct/slice.dcm.imgcache")
        );
        assert_eq!(
            config.cache_path("/data/ct/IM0001"),
            PathBuf::from("/data/ct/IM0001.imgcache")
        );
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = PipelineConfig::new()
            .with_cache_extension("lut")
            .with_dicom_extension("dicom")
            .with_max_pixel_bytes(10);
        assert_eq!(config.cache_extension(), "lut");
        assert_eq!(config.dicom_extension(), "dicom");
        assert_eq!(config.max_pixel_bytes(), Some(10));
        assert_eq!(PipelineConfig::default().max_pixel_bytes(), None);
    }
}
