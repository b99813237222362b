// THEORY:
// The `Preprocessor` turns a raw `Frame` into the 8-bit `ProcessedFrame` that
// every later stage consumes. It is stateless: the output of a tick depends only
// on that tick's frame and parameter snapshot.
//
// Steps, in order:
// 1.  **Depth remap**: depth samples between the near and far planes are mapped
//     linearly onto 255..0. Anything at or beyond the far plane, and anything at
//     or in front of the near plane (which includes the sensor's zero "no
//     reading" value), becomes 0 so it can never be mistaken for a close object.
//     Intensity frames skip this step.
// 2.  **Crop blanking**: the four margins are painted black.
// 3.  **Directional blur**: a separable Gaussian kernel is swept along the blur
//     direction and its perpendicular. The tap spacing is the blur scale, so a
//     scale of zero leaves the image untouched.

use crate::core_modules::frame::{Frame, FrameKind, ProcessedFrame};
use crate::core_modules::parameters::Parameters;
use image::{GrayImage, Luma};

const BLUR_RADIUS: usize = 4;
const BLUR_SHAPE: f32 = 0.2;

/// Maps a depth sample to the `[0, 1]` range used for tracking.
///
/// `near` maps towards 1 and `far` to 0. A result of exactly 1 is clipped to 0,
/// as is everything when the planes coincide.
pub fn remap_depth(value: f32, near: f32, far: f32) -> f32 {
    if far <= near {
        return 0.0;
    }
    let d = (1.0 + (value - near) * (0.0 - 1.0) / (far - near)).clamp(0.0, 1.0);
    if d == 1.0 { 0.0 } else { d }
}

/// Stateless frame preprocessing for a fixed sensor resolution.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    kernel: Vec<f32>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            kernel: gaussian_kernel(BLUR_RADIUS, BLUR_SHAPE),
        }
    }

    /// Runs remap, crop and blur. The output has the dimensions of `frame`.
    pub fn process(&self, frame: &Frame, params: &Parameters) -> ProcessedFrame {
        let mut image = match frame.kind {
            FrameKind::Depth => {
                let near = params.near_clip as f32;
                let far = params.far_clip as f32;
                GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
                    let d = remap_depth(frame.samples.get_pixel(x, y)[0] as f32, near, far);
                    Luma([(d * 255.0).round() as u8])
                })
            }
            FrameKind::Intensity => GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
                Luma([frame.samples.get_pixel(x, y)[0].min(255) as u8])
            }),
        };

        blank_margins(&mut image, params);

        if params.blur_scale > 0.0 {
            image = self.blur(&image, params.blur_scale, params.blur_rotation);
        }

        ProcessedFrame {
            index: frame.index,
            image,
        }
    }

    fn blur(&self, image: &GrayImage, scale: f32, rotation: f32) -> GrayImage {
        let (width, height) = image.dimensions();
        let source: Vec<f32> = image.pixels().map(|p| p[0] as f32).collect();

        let (sin, cos) = rotation.sin_cos();
        let along = directional_pass(&source, width, height, cos * scale, sin * scale, &self.kernel);
        let across = directional_pass(&along, width, height, -sin * scale, cos * scale, &self.kernel);

        GrayImage::from_fn(width, height, |x, y| {
            let value = across[(y * width + x) as usize];
            Luma([value.round().clamp(0.0, 255.0) as u8])
        })
    }
}

/// Paints the crop margins black. Margins larger than the image simply cover it.
fn blank_margins(image: &mut GrayImage, params: &Parameters) {
    let (width, height) = image.dimensions();
    let right_edge = width.saturating_sub(params.crop_right);
    let bottom_edge = height.saturating_sub(params.crop_bottom);

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if x < params.crop_left || x >= right_edge || y < params.crop_top || y >= bottom_edge {
            *pixel = Luma([0]);
        }
    }
}

/// Normalised Gaussian taps over `[-1, 1]` with `2 * radius + 1` entries.
fn gaussian_kernel(radius: usize, shape: f32) -> Vec<f32> {
    let size = 2 * radius + 1;
    let taps: Vec<f32> = (0..size)
        .map(|i| {
            let x = (i as f32 / (size - 1) as f32) * 2.0 - 1.0;
            (-(x * x) / (2.0 * shape * shape)).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// One 1-D convolution along the step `(dx, dy)` per tap.
fn directional_pass(source: &[f32], width: u32, height: u32, dx: f32, dy: f32, kernel: &[f32]) -> Vec<f32> {
    let radius = (kernel.len() / 2) as f32;
    let mut output = vec![0.0; source.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, weight) in kernel.iter().enumerate() {
                let offset = i as f32 - radius;
                let sx = x as f32 + dx * offset;
                let sy = y as f32 + dy * offset;
                acc += weight * sample_bilinear(source, width, height, sx, sy);
            }
            output[(y * width + x) as usize] = acc;
        }
    }
    output
}

fn sample_bilinear(source: &[f32], width: u32, height: u32, x: f32, y: f32) -> f32 {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let at = |px: u32, py: u32| source[(py * width + px) as usize];
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_frame(width: u32, height: u32, value: u16) -> Frame {
        Frame::from_depth(0, width, height, vec![value; (width * height) as usize]).unwrap()
    }

    #[test]
    fn far_plane_maps_to_clipped_sentinel() {
        assert_eq!(remap_depth(5000.0, 0.0, 5000.0), 0.0);
        assert_eq!(remap_depth(9000.0, 0.0, 5000.0), 0.0);
        assert!((remap_depth(2500.0, 0.0, 5000.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn near_plane_and_missing_readings_are_clipped() {
        assert_eq!(remap_depth(0.0, 0.0, 5000.0), 0.0);
        assert_eq!(remap_depth(500.0, 1000.0, 5000.0), 0.0);
        assert_eq!(remap_depth(1200.0, 1000.0, 1000.0), 0.0);
    }

    #[test]
    fn closer_objects_are_brighter() {
        let params = Parameters::default();
        let mut samples = vec![4000u16; 16];
        samples[5] = 1000;
        let frame = Frame::from_depth(0, 4, 4, samples).unwrap();
        let processed = Preprocessor::new().process(&frame, &params);
        assert_eq!((processed.width(), processed.height()), (4, 4));
        assert!(processed.image.get_pixel(1, 1)[0] > processed.image.get_pixel(0, 0)[0]);
        assert_eq!(processed.image.get_pixel(1, 1)[0], 204);
    }

    #[test]
    fn crop_margins_are_blanked() {
        let params = Parameters {
            crop_left: 1,
            crop_right: 2,
            crop_top: 1,
            crop_bottom: 1,
            ..Parameters::default()
        };
        let frame = depth_frame(6, 5, 1000);
        let processed = Preprocessor::new().process(&frame, &params);
        for (x, y, pixel) in processed.image.enumerate_pixels() {
            let inside = (1..4).contains(&x) && (1..4).contains(&y);
            assert_eq!(pixel[0] != 0, inside, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn intensity_frames_skip_the_remap() {
        let gray = GrayImage::from_fn(4, 4, |x, _| Luma([(x * 60) as u8]));
        let frame = Frame::from_gray(0, &gray);
        let processed = Preprocessor::new().process(&frame, &Parameters::default());
        assert_eq!(processed.image, gray);
    }

    #[test]
    fn blur_spreads_along_the_rotation() {
        let mut gray = GrayImage::new(21, 21);
        gray.put_pixel(10, 10, Luma([255]));
        let frame = Frame::from_gray(0, &gray);
        let params = Parameters {
            blur_scale: 1.0,
            blur_rotation: 0.0,
            ..Parameters::default()
        };
        let processed = Preprocessor::new().process(&frame, &params);
        let center = processed.image.get_pixel(10, 10)[0];
        assert!(center < 255);
        assert!(processed.image.get_pixel(11, 10)[0] > 0);
        assert!(processed.image.get_pixel(10, 11)[0] > 0);
        assert_eq!(processed.image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let kernel = gaussian_kernel(BLUR_RADIUS, BLUR_SHAPE);
        assert_eq!(kernel.len(), 9);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[8]).abs() < 1e-7);
        assert!(kernel[4] > kernel[3]);
    }
}
