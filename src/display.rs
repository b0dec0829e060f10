//! Windowing, color lookup and orientation labels for display.

use crate::{
    canonical::CanonicalImage,
    enums::{ClutMode, WindowPreset},
};

use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use rayon::prelude::*;

/// Minimum absolute direction cosine for an axis to contribute a letter
pub const ORIENTATION_THRESHOLD: f32 = 0.25;

/// Window center and width, in modality units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLevel {
    pub center: f32,
    /// Should be greater than 0
    pub width: f32,
}

impl WindowLevel {
    pub fn new(center: f32, width: f32) -> Self {
        Self { center, width }
    }

    /// Window covering `[min, max]`, at least one unit wide.
    pub fn from_range((min, max): (f32, f32)) -> Self {
        Self {
            center: (min + max) / 2.0,
            width: (max - min).max(1.0),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.width > 0.0 && self.width.is_finite() && self.center.is_finite()
    }

    /// This window, or `fallback` when the width is not positive.
    pub fn or(self, fallback: WindowLevel) -> WindowLevel {
        if self.is_usable() { self } else { fallback }
    }
}

impl From<WindowPreset> for WindowLevel {
    fn from(preset: WindowPreset) -> Self {
        match preset {
            WindowPreset::CtBone => WindowLevel::new(300.0, 1500.0),
            WindowPreset::CtCranium => WindowLevel::new(50.0, 100.0),
            WindowPreset::CtLung => WindowLevel::new(-400.0, 1400.0),
            WindowPreset::CtAbdomen => WindowLevel::new(40.0, 350.0),
        }
    }
}

/// Output of the color lookup for one pixel, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayValue {
    Intensity(f32),
    Color([f32; 3]),
}

impl DisplayValue {
    pub fn to_rgb8(self) -> [u8; 3] {
        match self {
            DisplayValue::Intensity(i) => {
                let v = to_u8(i);
                [v, v, v]
            }
            DisplayValue::Color([r, g, b]) => [to_u8(r), to_u8(g), to_u8(b)],
        }
    }
}

#[inline]
fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Linear windowing of a modality value into `[0, 1]`.
///
/// A width that is not positive degenerates into a threshold at the center.
#[inline]
pub fn normalized_intensity(value: f32, center: f32, width: f32) -> f32 {
    if !(width > 0.0) {
        return if value >= center { 1.0 } else { 0.0 };
    }
    ((value - (center - width / 2.0)) / width).clamp(0.0, 1.0)
}

/// Window a modality value, then map it through the color lookup.
#[inline]
pub fn display(value: f32, center: f32, width: f32, mode: ClutMode) -> DisplayValue {
    let intensity = normalized_intensity(value, center, width);
    match mode {
        ClutMode::Normal => DisplayValue::Intensity(intensity),
        ClutMode::Inverse => DisplayValue::Intensity(1.0 - intensity),
        ClutMode::Rainbow => DisplayValue::Color(rainbow(intensity)),
    }
}

const RAINBOW_STOPS: [[f32; 3]; 5] = [
    [0.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
    [0.0, 1.0, 0.0],
    [1.0, 1.0, 0.0],
    [1.0, 0.0, 0.0],
];

/// Blue, cyan, green, yellow, red ramp over `[0, 1]`.
pub fn rainbow(intensity: f32) -> [f32; 3] {
    let segments = (RAINBOW_STOPS.len() - 1) as f32;
    let position = intensity.clamp(0.0, 1.0) * segments;
    let index = (position.floor() as usize).min(RAINBOW_STOPS.len() - 2);
    let t = position - index as f32;
    let (from, to) = (RAINBOW_STOPS[index], RAINBOW_STOPS[index + 1]);
    [
        (to[0] - from[0]).mul_add(t, from[0]),
        (to[1] - from[1]).mul_add(t, from[1]),
        (to[2] - from[2]).mul_add(t, from[2]),
    ]
}

/// Render an image for display.
///
/// Each stored sample is rescaled to its modality value, windowed with
/// `window` (or the image's own window when `window` is absent or not
/// positive) and mapped through `mode`. Normal and inverse produce 8-bit
/// grayscale, rainbow produces 8-bit RGB.
pub fn render(
    image: &CanonicalImage,
    window: Option<WindowLevel>,
    mode: ClutMode,
) -> Option<DynamicImage> {
    let WindowLevel { center, width } = window
        .map(|w| w.or(image.window()))
        .unwrap_or_else(|| image.window());
    let rescale = image.rescale();
    let (w, h) = (image.width(), image.height());

    match mode {
        ClutMode::Normal | ClutMode::Inverse => {
            let pixel_data: Vec<u8> = image
                .pixels()
                .par_iter()
                .map(|&stored| display(rescale.apply(stored), center, width, mode).to_rgb8()[0])
                .collect();
            ImageBuffer::<Luma<u8>, _>::from_raw(w, h, pixel_data).map(DynamicImage::ImageLuma8)
        }
        ClutMode::Rainbow => {
            let pixel_data: Vec<u8> = image
                .pixels()
                .par_iter()
                .flat_map_iter(|&stored| display(rescale.apply(stored), center, width, mode).to_rgb8())
                .collect();
            ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, pixel_data).map(DynamicImage::ImageRgb8)
        }
    }
}

/// Direction letters for the row and column axes of an image plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientationLabels {
    pub row: String,
    pub column: String,
}

impl OrientationLabels {
    /// `cosines` holds the row direction (x, y, z) followed by the column direction.
    pub fn from_cosines(cosines: &[f32; 6]) -> Self {
        Self {
            row: axis_label(&cosines[0..3]),
            column: axis_label(&cosines[3..6]),
        }
    }
}

/// Letters for one direction: R/L on x, A/P on y, F/H on z, in that order.
/// Components strictly between -0.25 and 0.25 contribute nothing.
pub fn axis_label(direction: &[f32]) -> String {
    const LETTERS: [(char, char); 3] = [('R', 'L'), ('A', 'P'), ('F', 'H')];

    direction
        .iter()
        .zip(LETTERS)
        .filter_map(|(&component, (positive, negative))| {
            if component >= ORIENTATION_THRESHOLD {
                Some(positive)
            } else if component <= -ORIENTATION_THRESHOLD {
                Some(negative)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Rescale;
    use rstest::rstest;

    #[test]
    fn center_maps_to_midpoint() {
        assert_eq!(normalized_intensity(40.0, 40.0, 400.0), 0.5);
        assert_eq!(
            display(40.0, 40.0, 400.0, ClutMode::Normal),
            DisplayValue::Intensity(0.5)
        );
    }

    #[rstest]
    #[case(-5000.0, 40.0, 400.0)]
    #[case(-160.0, 40.0, 400.0)]
    #[case(0.0, 40.0, 400.0)]
    #[case(240.0, 40.0, 400.0)]
    #[case(70000.0, 40.0, 400.0)]
    #[case(12.5, -1000.0, 0.001)]
    #[case(300.0, 300.0, 1500.0)]
    fn intensity_stays_in_range(#[case] value: f32, #[case] center: f32, #[case] width: f32) {
        let intensity = normalized_intensity(value, center, width);
        assert!((0.0..=1.0).contains(&intensity));
    }

    #[rstest]
    #[case(-200.0, 40.0, 400.0)]
    #[case(0.0, 40.0, 400.0)]
    #[case(139.0, 40.0, 400.0)]
    #[case(1024.0, -400.0, 1400.0)]
    #[case(5.0, 5.0, 0.0)]
    fn inverse_mirrors_normal(#[case] value: f32, #[case] center: f32, #[case] width: f32) {
        let DisplayValue::Intensity(normal) = display(value, center, width, ClutMode::Normal)
        else {
            panic!("normal mode should produce an intensity");
        };
        let DisplayValue::Intensity(inverse) = display(value, center, width, ClutMode::Inverse)
        else {
            panic!("inverse mode should produce an intensity");
        };
        assert_eq!(inverse, 1.0 - normal);
    }

    #[test]
    fn window_edges() {
        assert_eq!(normalized_intensity(-160.0, 40.0, 400.0), 0.0);
        assert_eq!(normalized_intensity(240.0, 40.0, 400.0), 1.0);
        assert_eq!(normalized_intensity(140.0, 40.0, 400.0), 0.75);
        // degenerate width thresholds at the center
        assert_eq!(normalized_intensity(39.0, 40.0, 0.0), 0.0);
        assert_eq!(normalized_intensity(40.0, 40.0, -3.0), 1.0);
    }

    #[test]
    fn rainbow_ramp_stops() {
        assert_eq!(rainbow(0.0), [0.0, 0.0, 1.0]);
        assert_eq!(rainbow(0.5), [0.0, 1.0, 0.0]);
        assert_eq!(rainbow(1.0), [1.0, 0.0, 0.0]);
        assert_eq!(rainbow(0.125), [0.0, 0.5, 1.0]);
        assert_eq!(
            display(40.0, 40.0, 400.0, ClutMode::Rainbow).to_rgb8(),
            [0, 255, 0]
        );
    }

    #[test]
    fn presets_are_in_hounsfield_units() {
        assert_eq!(WindowLevel::from(WindowPreset::CtLung), WindowLevel::new(-400.0, 1400.0));
        assert_eq!(WindowLevel::from(WindowPreset::CtBone).width, 1500.0);
    }

    #[test]
    fn unusable_window_falls_back() {
        let fallback = WindowLevel::new(10.0, 20.0);
        assert_eq!(WindowLevel::new(0.0, 0.0).or(fallback), fallback);
        assert_eq!(WindowLevel::new(1.0, -5.0).or(fallback), fallback);
        assert_eq!(WindowLevel::new(1.0, 5.0).or(fallback), WindowLevel::new(1.0, 5.0));
    }

    #[test]
    fn orientation_of_axial_plane() {
        let labels = OrientationLabels::from_cosines(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(labels.row, "R");
        assert_eq!(labels.column, "A");
    }

    #[rstest]
    #[case([0.25, -0.25, 0.0], "RP")]
    #[case([0.2499, -0.2499, 0.9], "F")]
    #[case([-0.7071, 0.0, -0.7071], "LH")]
    #[case([0.0, 0.0, 0.0], "")]
    #[case([-1.0, -1.0, 1.0], "LPF")]
    fn axis_thresholds(#[case] direction: [f32; 3], #[case] expected: &str) {
        assert_eq!(axis_label(&direction), expected);
    }

    #[test]
    fn render_gray_and_rainbow() {
        let image = CanonicalImage::new(2, 2, vec![0, 1024, 1104, 4095])
            .unwrap()
            .with_rescale(Rescale::new(1.0, -1024.0))
            .with_window(WindowLevel::new(40.0, 80.0));

        let gray = render(&image, None, ClutMode::Normal).unwrap().into_luma8();
        assert_eq!(gray.dimensions(), (2, 2));
        assert_eq!(gray.as_raw(), &vec![0, 0, 255, 255]);

        let inverse = render(&image, None, ClutMode::Inverse).unwrap().into_luma8();
        assert_eq!(inverse.as_raw(), &vec![255, 255, 0, 0]);

        // an override with zero width keeps the image's own window
        let same = render(&image, Some(WindowLevel::new(0.0, 0.0)), ClutMode::Normal)
            .unwrap()
            .into_luma8();
        assert_eq!(same, gray);

        let color = render(&image, Some(WindowLevel::new(0.0, 2048.0)), ClutMode::Rainbow)
            .unwrap()
            .into_rgb8();
        assert_eq!(color.dimensions(), (2, 2));
        assert_eq!(color.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(color.get_pixel(1, 1).0, [255, 0, 0]);
    }
}
