use crate::{
    display::{OrientationLabels, WindowLevel},
    error::{Error, Result},
};

use ndarray::{Array2, ArrayView2};

/// Modality rescale: `slope * stored + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f32,
    pub intercept: f32,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    pub fn new(slope: f32, intercept: f32) -> Self {
        Self { slope, intercept }
    }

    #[inline]
    pub fn apply(&self, stored: u16) -> f32 {
        self.slope.mul_add(f32::from(stored), self.intercept)
    }
}

/// A single 16-bit grayscale slice with the metadata needed to display it.
///
/// This is what the decoder produces, the cache stores and the renderer
/// consumes. The raster is row-major with `height` rows of `width` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalImage {
    data: Array2<u16>,
    window: WindowLevel,
    rescale: Rescale,
    orientation: Option<[f32; 6]>,
}

impl CanonicalImage {
    /// Wrap a row-major pixel buffer.
    ///
    /// The window defaults to the range of values present and the rescale
    /// to identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] unless `pixels.len() == width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Result<Self> {
        let invalid = |len| Error::InvalidDimensions { width, height, len };
        let expected = (width as usize).checked_mul(height as usize);
        if expected != Some(pixels.len()) {
            return Err(invalid(pixels.len()));
        }
        let len = pixels.len();
        let data = Array2::from_shape_vec((height as usize, width as usize), pixels)
            .map_err(|_| invalid(len))?;

        let rescale = Rescale::default();
        let window = WindowLevel::from_range(modality_range(&data, rescale));
        Ok(Self {
            data,
            window,
            rescale,
            orientation: None,
        })
    }

    pub fn with_window(mut self, window: WindowLevel) -> Self {
        self.window = window;
        self
    }

    pub fn with_rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = rescale;
        self
    }

    /// Set the direction cosines (row x/y/z, then column x/y/z).
    /// An all-zero vector counts as no orientation.
    pub fn with_orientation(mut self, orientation: Option<[f32; 6]>) -> Self {
        self.orientation = orientation.filter(|o| o.iter().any(|&v| v != 0.0));
        self
    }

    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    /// Get the dimensions of the image (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Get a view of the raster indexed by `[row, column]`
    pub fn data(&self) -> ArrayView2<'_, u16> {
        self.data.view()
    }

    /// Stored samples in row-major order
    pub fn pixels(&self) -> &[u16] {
        self.data.as_slice().unwrap_or_default()
    }

    pub fn window(&self) -> WindowLevel {
        self.window
    }

    pub fn rescale(&self) -> Rescale {
        self.rescale
    }

    pub fn orientation(&self) -> Option<[f32; 6]> {
        self.orientation
    }

    /// Modality value of the sample at `[row, column]`
    pub fn modality_value(&self, row: usize, column: usize) -> Option<f32> {
        self.data
            .get((row, column))
            .map(|&stored| self.rescale.apply(stored))
    }

    /// Smallest and largest modality value in the raster
    pub fn modality_range(&self) -> (f32, f32) {
        modality_range(&self.data, self.rescale)
    }

    /// Patient-relative direction letters of the row and column axes.
    pub fn orientation_labels(&self) -> Option<OrientationLabels> {
        self.orientation.as_ref().map(OrientationLabels::from_cosines)
    }
}

pub(crate) fn modality_range(data: &Array2<u16>, rescale: Rescale) -> (f32, f32) {
    let (min, max) = data
        .iter()
        .fold((u16::MAX, u16::MIN), |(min, max), &v| (min.min(v), max.max(v)));
    if min > max {
        return (0.0, 0.0);
    }
    let (a, b) = (rescale.apply(min), rescale.apply(max));
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = CanonicalImage::new(3, 2, vec![0; 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDimensions {
                width: 3,
                height: 2,
                len: 5
            }
        ));
        assert!(CanonicalImage::new(0, 0, Vec::new()).is_ok());
    }

    #[test]
    fn row_major_layout() {
        let image = CanonicalImage::new(3, 2, vec![0, 1, 2, 10, 11, 12]).unwrap();
        assert_eq!(image.dim(), (2, 3));
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(image.data()[[1, 2]], 12);
        assert_eq!(image.pixels(), &[0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn default_window_spans_pixel_range() {
        let image = CanonicalImage::new(2, 2, vec![100, 200, 300, 500]).unwrap();
        assert_eq!(image.window(), WindowLevel::new(300.0, 400.0));
    }

    #[test]
    fn modality_values_apply_rescale() {
        let image = CanonicalImage::new(2, 1, vec![0, 1024])
            .unwrap()
            .with_rescale(Rescale::new(1.0, -1024.0));
        assert_eq!(image.modality_value(0, 0), Some(-1024.0));
        assert_eq!(image.modality_value(0, 1), Some(0.0));
        assert_eq!(image.modality_value(1, 0), None);
        assert_eq!(image.modality_range(), (-1024.0, 0.0));
    }

    #[test]
    fn zero_orientation_is_absent() {
        let image = CanonicalImage::new(1, 1, vec![0])
            .unwrap()
            .with_orientation(Some([0.0; 6]));
        assert_eq!(image.orientation(), None);
        assert!(image.orientation_labels().is_none());
    }
}
