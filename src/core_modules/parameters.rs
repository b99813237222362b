// THEORY:
// The `parameters` module is the live configuration of every stage of the
// engine. It is deliberately passive: it knows the valid range of each value and
// clamps on every write, but it never calls into the stages it configures.
//
// Writes arrive as typed `ParameterCommand`s. The network control path decodes
// datagrams into commands and queues them; a local control surface can build the
// same commands or call the setters directly. The pipeline applies the whole
// backlog at the start of a tick, so every stage of that tick reads one
// consistent snapshot.

use serde::Deserialize;
use std::f32::consts::PI;

pub const NEAR_CLIP_MAX: i32 = 12000;
pub const FAR_CLIP_MAX: i32 = 12000;
pub const THRESHOLD_MAX: i32 = 255;
pub const BACKGROUND_THRESHOLD_MAX: i32 = 30;
pub const MIN_AREA_RADIUS_MAX: i32 = 100;
pub const MAX_AREA_RADIUS_MIN: i32 = 100;
pub const MAX_AREA_RADIUS_MAX: i32 = 500;
pub const BLUR_SCALE_MAX: f32 = 2.0;
pub const SIMPLIFY_TOLERANCE_MAX: f32 = 2.0;
pub const SMOOTHING_SIZE_MAX: f32 = 5.0;
pub const SMOOTHING_SHAPE_MAX: f32 = 1.0;

/// A full set of tuning values. Always in range when read from a `ParameterStore`.
///
/// Deserializes from a config table where every key is optional.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    /// Depth mapped to full intensity (millimetres).
    pub near_clip: i32,
    /// Depth mapped to zero intensity (millimetres).
    pub far_clip: i32,
    /// Tolerance around white for a pixel to count as target colour.
    pub threshold: i32,
    /// Deviation from the learned background for a pixel to count as foreground.
    pub background_threshold: i32,
    /// Smallest accepted contour, as an equivalent-circle radius in pixels.
    pub min_area_radius: i32,
    /// Largest accepted contour, as an equivalent-circle radius in pixels.
    pub max_area_radius: i32,
    pub blur_scale: f32,
    /// Blur direction in radians.
    pub blur_rotation: f32,
    pub simplify_tolerance: f32,
    pub smoothing_size: f32,
    pub smoothing_shape: f32,
    pub crop_left: u32,
    pub crop_right: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    pub background_subtraction: bool,
    pub send_all_contours: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            near_clip: 0,
            far_clip: 5000,
            threshold: 40,
            background_threshold: 10,
            min_area_radius: 20,
            max_area_radius: 100,
            blur_scale: 0.0,
            blur_rotation: 0.0,
            simplify_tolerance: 0.0,
            smoothing_size: 0.0,
            smoothing_shape: 0.0,
            crop_left: 0,
            crop_right: 0,
            crop_top: 0,
            crop_bottom: 0,
            background_subtraction: true,
            send_all_contours: true,
        }
    }
}

/// One requested change to the engine's configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterCommand {
    NearClip(i32),
    FarClip(i32),
    Threshold(i32),
    BackgroundThreshold(i32),
    MinArea(i32),
    MaxArea(i32),
    BlurScale(f32),
    BlurRotation(f32),
    SimplifyTolerance(f32),
    SmoothingSize(f32),
    SmoothingShape(f32),
    CropLeft(i32),
    CropRight(i32),
    CropTop(i32),
    CropBottom(i32),
    BackgroundSubtraction(bool),
    SendAllContours(bool),
    /// Discard the learned background. Carries no value.
    ResetBackground,
}

/// The clamped parameter set for a sensor of fixed dimensions.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    values: Parameters,
    frame_width: u32,
    frame_height: u32,
}

impl ParameterStore {
    /// Creates a store with default values for a `frame_width` x `frame_height` sensor.
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self::with_values(frame_width, frame_height, Parameters::default())
    }

    /// Creates a store from initial values, clamping each of them.
    pub fn with_values(frame_width: u32, frame_height: u32, initial: Parameters) -> Self {
        let mut store = Self {
            values: Parameters::default(),
            frame_width,
            frame_height,
        };
        store.set_near_clip(initial.near_clip);
        store.set_far_clip(initial.far_clip);
        store.set_threshold(initial.threshold);
        store.set_background_threshold(initial.background_threshold);
        store.set_min_area_radius(initial.min_area_radius);
        store.set_max_area_radius(initial.max_area_radius);
        store.set_blur_scale(initial.blur_scale);
        store.set_blur_rotation(initial.blur_rotation);
        store.set_simplify_tolerance(initial.simplify_tolerance);
        store.set_smoothing_size(initial.smoothing_size);
        store.set_smoothing_shape(initial.smoothing_shape);
        store.values.crop_left = limit_margin(initial.crop_left, frame_width);
        store.values.crop_right = limit_margin(initial.crop_right, frame_width);
        store.values.crop_top = limit_margin(initial.crop_top, frame_height);
        store.values.crop_bottom = limit_margin(initial.crop_bottom, frame_height);
        store.set_background_subtraction(initial.background_subtraction);
        store.set_send_all_contours(initial.send_all_contours);
        store
    }

    /// Applies a command. `ResetBackground` is not a stored value and is ignored here;
    /// the pipeline routes it to the background model.
    pub fn apply(&mut self, command: ParameterCommand) {
        match command {
            ParameterCommand::NearClip(v) => self.set_near_clip(v),
            ParameterCommand::FarClip(v) => self.set_far_clip(v),
            ParameterCommand::Threshold(v) => self.set_threshold(v),
            ParameterCommand::BackgroundThreshold(v) => self.set_background_threshold(v),
            ParameterCommand::MinArea(v) => self.set_min_area_radius(v),
            ParameterCommand::MaxArea(v) => self.set_max_area_radius(v),
            ParameterCommand::BlurScale(v) => self.set_blur_scale(v),
            ParameterCommand::BlurRotation(v) => self.set_blur_rotation(v),
            ParameterCommand::SimplifyTolerance(v) => self.set_simplify_tolerance(v),
            ParameterCommand::SmoothingSize(v) => self.set_smoothing_size(v),
            ParameterCommand::SmoothingShape(v) => self.set_smoothing_shape(v),
            ParameterCommand::CropLeft(v) => self.set_crop_left(v),
            ParameterCommand::CropRight(v) => self.set_crop_right(v),
            ParameterCommand::CropTop(v) => self.set_crop_top(v),
            ParameterCommand::CropBottom(v) => self.set_crop_bottom(v),
            ParameterCommand::BackgroundSubtraction(v) => self.set_background_subtraction(v),
            ParameterCommand::SendAllContours(v) => self.set_send_all_contours(v),
            ParameterCommand::ResetBackground => {}
        }
    }

    /// A copy of the current values for display.
    pub fn snapshot(&self) -> Parameters {
        self.values
    }

    pub fn frame_dimensions(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    // --- Setters ---

    /// Raising the near plane past the far plane drags the far plane along.
    pub fn set_near_clip(&mut self, value: i32) {
        self.values.near_clip = value.clamp(0, NEAR_CLIP_MAX);
        if self.values.far_clip < self.values.near_clip {
            self.values.far_clip = self.values.near_clip;
        }
    }

    pub fn set_far_clip(&mut self, value: i32) {
        self.values.far_clip = value.clamp(self.values.near_clip, FAR_CLIP_MAX);
    }

    pub fn set_threshold(&mut self, value: i32) {
        self.values.threshold = value.clamp(0, THRESHOLD_MAX);
    }

    pub fn set_background_threshold(&mut self, value: i32) {
        self.values.background_threshold = value.clamp(0, BACKGROUND_THRESHOLD_MAX);
    }

    pub fn set_min_area_radius(&mut self, value: i32) {
        self.values.min_area_radius = value.clamp(0, MIN_AREA_RADIUS_MAX);
    }

    pub fn set_max_area_radius(&mut self, value: i32) {
        self.values.max_area_radius = value.clamp(MAX_AREA_RADIUS_MIN, MAX_AREA_RADIUS_MAX);
    }

    pub fn set_blur_scale(&mut self, value: f32) {
        self.values.blur_scale = clamp_f32(value, 0.0, BLUR_SCALE_MAX);
    }

    pub fn set_blur_rotation(&mut self, value: f32) {
        self.values.blur_rotation = clamp_f32(value, -PI, PI);
    }

    pub fn set_simplify_tolerance(&mut self, value: f32) {
        self.values.simplify_tolerance = clamp_f32(value, 0.0, SIMPLIFY_TOLERANCE_MAX);
    }

    pub fn set_smoothing_size(&mut self, value: f32) {
        self.values.smoothing_size = clamp_f32(value, 0.0, SMOOTHING_SIZE_MAX);
    }

    pub fn set_smoothing_shape(&mut self, value: f32) {
        self.values.smoothing_shape = clamp_f32(value, 0.0, SMOOTHING_SHAPE_MAX);
    }

    pub fn set_crop_left(&mut self, value: i32) {
        self.values.crop_left = clamp_margin(value, self.frame_width);
    }

    pub fn set_crop_right(&mut self, value: i32) {
        self.values.crop_right = clamp_margin(value, self.frame_width);
    }

    pub fn set_crop_top(&mut self, value: i32) {
        self.values.crop_top = clamp_margin(value, self.frame_height);
    }

    pub fn set_crop_bottom(&mut self, value: i32) {
        self.values.crop_bottom = clamp_margin(value, self.frame_height);
    }

    pub fn set_background_subtraction(&mut self, enabled: bool) {
        self.values.background_subtraction = enabled;
    }

    pub fn set_send_all_contours(&mut self, enabled: bool) {
        self.values.send_all_contours = enabled;
    }

    // --- Accessors ---

    pub fn near_clip(&self) -> i32 {
        self.values.near_clip
    }

    pub fn far_clip(&self) -> i32 {
        self.values.far_clip
    }

    pub fn threshold(&self) -> i32 {
        self.values.threshold
    }

    pub fn background_threshold(&self) -> i32 {
        self.values.background_threshold
    }

    pub fn min_area_radius(&self) -> i32 {
        self.values.min_area_radius
    }

    pub fn max_area_radius(&self) -> i32 {
        self.values.max_area_radius
    }

    pub fn blur_scale(&self) -> f32 {
        self.values.blur_scale
    }

    pub fn blur_rotation(&self) -> f32 {
        self.values.blur_rotation
    }

    pub fn simplify_tolerance(&self) -> f32 {
        self.values.simplify_tolerance
    }

    pub fn smoothing_size(&self) -> f32 {
        self.values.smoothing_size
    }

    pub fn smoothing_shape(&self) -> f32 {
        self.values.smoothing_shape
    }

    pub fn crop_left(&self) -> u32 {
        self.values.crop_left
    }

    pub fn crop_right(&self) -> u32 {
        self.values.crop_right
    }

    pub fn crop_top(&self) -> u32 {
        self.values.crop_top
    }

    pub fn crop_bottom(&self) -> u32 {
        self.values.crop_bottom
    }

    pub fn background_subtraction(&self) -> bool {
        self.values.background_subtraction
    }

    pub fn send_all_contours(&self) -> bool {
        self.values.send_all_contours
    }
}

/// NaN has no nearest bound; it lands on the lower one.
fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

fn clamp_margin(value: i32, dimension: u32) -> u32 {
    limit_margin(value.max(0) as u32, dimension)
}

fn limit_margin(value: u32, dimension: u32) -> u32 {
    value.min(dimension / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_are_in_range() {
        let store = ParameterStore::new(512, 424);
        assert_eq!(store.snapshot(), Parameters::default());
    }

    #[test]
    fn out_of_range_values_land_on_the_nearest_bound() {
        let mut store = ParameterStore::new(512, 424);
        store.apply(ParameterCommand::Threshold(300));
        store.apply(ParameterCommand::BackgroundThreshold(-4));
        store.apply(ParameterCommand::MaxArea(20));
        store.apply(ParameterCommand::BlurRotation(10.0));
        store.apply(ParameterCommand::SmoothingShape(f32::NAN));
        store.apply(ParameterCommand::CropLeft(1000));
        store.apply(ParameterCommand::CropBottom(1000));

        assert_eq!(store.threshold(), 255);
        assert_eq!(store.background_threshold(), 0);
        assert_eq!(store.max_area_radius(), 100);
        assert_eq!(store.blur_rotation(), PI);
        assert_eq!(store.smoothing_shape(), 0.0);
        assert_eq!(store.crop_left(), 256);
        assert_eq!(store.crop_bottom(), 212);
    }

    #[test]
    fn far_clip_never_drops_below_near_clip() {
        let mut store = ParameterStore::new(512, 424);
        store.set_near_clip(3000);
        store.set_far_clip(1000);
        assert_eq!(store.far_clip(), 3000);

        store.set_far_clip(4000);
        store.set_near_clip(6000);
        assert_eq!(store.near_clip(), 6000);
        assert_eq!(store.far_clip(), 6000);
    }

    #[test]
    fn reset_command_leaves_values_untouched() {
        let mut store = ParameterStore::new(512, 424);
        let before = store.snapshot();
        store.apply(ParameterCommand::ResetBackground);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn initial_values_are_clamped() {
        let initial = Parameters {
            threshold: -1,
            smoothing_size: 9.0,
            crop_top: 400,
            ..Parameters::default()
        };
        let store = ParameterStore::with_values(512, 424, initial);
        assert_eq!(store.threshold(), 0);
        assert_eq!(store.smoothing_size(), 5.0);
        assert_eq!(store.crop_top(), 212);
    }

    #[test]
    fn huge_initial_margins_clamp_to_half_the_frame() {
        let initial = Parameters {
            crop_left: 3_000_000_000,
            crop_bottom: u32::MAX,
            ..Parameters::default()
        };
        let store = ParameterStore::with_values(512, 424, initial);
        assert_eq!(store.crop_left(), 256);
        assert_eq!(store.crop_bottom(), 212);
    }

    proptest! {
        #[test]
        fn initial_margins_never_exceed_half_the_frame(v in any::<u32>()) {
            let initial = Parameters { crop_right: v, crop_top: v, ..Parameters::default() };
            let store = ParameterStore::with_values(512, 424, initial);
            prop_assert_eq!(store.crop_right(), v.min(256));
            prop_assert_eq!(store.crop_top(), v.min(212));
        }

        #[test]
        fn integer_setters_clamp(v in any::<i32>()) {
            let mut store = ParameterStore::new(512, 424);
            store.set_near_clip(v);
            prop_assert_eq!(store.near_clip(), v.clamp(0, NEAR_CLIP_MAX));
            store.set_threshold(v);
            prop_assert_eq!(store.threshold(), v.clamp(0, THRESHOLD_MAX));
            store.set_min_area_radius(v);
            prop_assert_eq!(store.min_area_radius(), v.clamp(0, MIN_AREA_RADIUS_MAX));
            store.set_max_area_radius(v);
            prop_assert_eq!(store.max_area_radius(), v.clamp(MAX_AREA_RADIUS_MIN, MAX_AREA_RADIUS_MAX));
            store.set_crop_right(v);
            prop_assert!(store.crop_right() <= 256);
        }

        #[test]
        fn float_setters_clamp(v in -1.0e6f32..1.0e6f32) {
            let mut store = ParameterStore::new(512, 424);
            store.set_blur_scale(v);
            prop_assert_eq!(store.blur_scale(), v.clamp(0.0, BLUR_SCALE_MAX));
            store.set_blur_rotation(v);
            prop_assert_eq!(store.blur_rotation(), v.clamp(-PI, PI));
            store.set_simplify_tolerance(v);
            prop_assert_eq!(store.simplify_tolerance(), v.clamp(0.0, SIMPLIFY_TOLERANCE_MAX));
        }

        #[test]
        fn far_clip_stays_between_near_and_max(near in any::<i32>(), far in any::<i32>()) {
            let mut store = ParameterStore::new(512, 424);
            store.set_near_clip(near);
            store.set_far_clip(far);
            prop_assert!(store.far_clip() >= store.near_clip());
            prop_assert!(store.far_clip() <= FAR_CLIP_MAX);
        }
    }
}
