// THEORY:
// The `ContourFinder` is the engine of the spatial grouping layer. It turns a
// processed frame (or a foreground mask) into a labelled list of closed outlines.
//
// Algorithm steps:
// 1.  **Target-colour binarisation**: a pixel is "on" when it lies within the
//     threshold of white. Foreground masks are pure black and white, so the same
//     rule serves both the background-subtracted and the raw-intensity path.
// 2.  **Border following**: a raster scan finds the start of every outer border
//     and every hole border, then walks each one around its 8-connected region
//     (Suzuki and Abe, via `imageproc`). Holes are kept, so a ring shape yields
//     two outlines.
// 3.  **Area filtering**: the bounds are equivalent-circle radii. An outline is
//     kept when `pi * min_r^2 <= area <= pi * max_r^2`, which keeps the knobs
//     meaningful across sensor resolutions.
// 4.  **Tracking**: the centroids of the surviving outlines go through the
//     internal `Tracker`, which hands back a persistent label for each.
//
// Steps 1 to 3 are stateless and deterministic; only step 4 remembers anything.

use crate::core_modules::contour::{Contour, Outline, Point};
use crate::core_modules::tracker::Tracker;
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use std::f64::consts::PI;

/// Marks pixels within `threshold` of white as 255 and everything else as 0.
pub fn binarize(image: &GrayImage, threshold: i32) -> GrayImage {
    let floor = 255 - threshold.clamp(0, 255);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let on = image.get_pixel(x, y)[0] as i32 >= floor;
        Luma([if on { 255 } else { 0 }])
    })
}

/// Traces every outer and hole border of the non-zero regions of `binary`.
/// Borders are returned in the raster order of their starting pixel.
pub fn trace_borders(binary: &GrayImage) -> Vec<Outline> {
    find_contours::<i32>(binary)
        .into_iter()
        .map(|contour| {
            let points = contour
                .points
                .iter()
                .map(|p| Point::new(p.x as f32, p.y as f32))
                .collect();
            Outline::new(points, matches!(contour.border_type, BorderType::Hole))
        })
        .collect()
}

/// Index of the outline with the largest area, first one on ties.
/// Outlines enclosing no area are never selected.
pub fn select_largest(contours: &[Contour]) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut best_area = 0.0;
    for (i, contour) in contours.iter().enumerate() {
        if contour.area() > best_area {
            best_area = contour.area();
            best = Some(i);
        }
    }
    best
}

/// Finds, filters and labels the outlines in a frame.
#[derive(Debug, Clone)]
pub struct ContourFinder {
    tracker: Tracker,
    min_area_radius: f64,
    max_area_radius: f64,
    threshold: i32,
}

impl ContourFinder {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            min_area_radius: 0.0,
            max_area_radius: f64::MAX,
            threshold: 128,
        }
    }

    pub fn set_min_area_radius(&mut self, radius: f64) {
        self.min_area_radius = radius;
    }

    pub fn set_max_area_radius(&mut self, radius: f64) {
        self.max_area_radius = radius;
    }

    pub fn set_threshold(&mut self, threshold: i32) {
        self.threshold = threshold;
    }

    /// True when `outline` falls inside the configured radius bounds.
    pub fn accepts(&self, outline: &Outline) -> bool {
        let min_area = PI * self.min_area_radius * self.min_area_radius;
        let max_area = PI * self.max_area_radius * self.max_area_radius;
        outline.area >= min_area && outline.area <= max_area
    }

    /// Stateless part of the finder: binarise, trace, filter.
    pub fn find_outlines(&self, image: &GrayImage) -> Vec<Outline> {
        let binary = binarize(image, self.threshold);
        trace_borders(&binary)
            .into_iter()
            .filter(|outline| self.accepts(outline))
            .collect()
    }

    /// Finds this frame's outlines and labels them through the tracker.
    pub fn find_contours(&mut self, image: &GrayImage) -> Vec<Contour> {
        let outlines = self.find_outlines(image);
        let centroids: Vec<(f64, f64)> = outlines.iter().map(|o| o.centroid).collect();
        let labels = self.tracker.update(&centroids);
        outlines
            .into_iter()
            .zip(labels)
            .map(|(outline, label)| Contour { label, outline })
            .collect()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::tracker::Tracker;

    fn image_with(width: u32, height: u32, on: impl Fn(u32, u32) -> bool) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([if on(x, y) { 255 } else { 0 }]))
    }

    fn open_finder() -> ContourFinder {
        ContourFinder::new(Tracker::default())
    }

    #[test]
    fn binarize_uses_distance_from_white() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([[214u8, 215, 255][x as usize]]));
        let binary = binarize(&image, 40);
        let values: Vec<u8> = binary.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 255, 255]);
    }

    #[test]
    fn single_pixel_is_one_point_outline() {
        let image = image_with(5, 5, |x, y| x == 2 && y == 2);
        let outlines = trace_borders(&image);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].points, vec![Point::new(2.0, 2.0)]);
        assert_eq!(outlines[0].area, 0.0);
    }

    #[test]
    fn rectangle_border_walks_every_edge_pixel() {
        let image = image_with(10, 10, |x, y| (2..6).contains(&x) && (3..6).contains(&y));
        let outlines = trace_borders(&image);
        assert_eq!(outlines.len(), 1);
        let outline = &outlines[0];
        assert!(!outline.is_hole);
        assert_eq!(outline.points.len(), 10);
        assert_eq!(outline.points[0], Point::new(2.0, 3.0));
        assert_eq!(outline.area, 6.0);
        assert_eq!(outline.centroid, (3.5, 4.0));
    }

    #[test]
    fn region_touching_the_frame_edge_is_traced_along_it() {
        let image = image_with(5, 4, |_, _| true);
        let outlines = trace_borders(&image);
        assert_eq!(outlines.len(), 1);
        let outline = &outlines[0];
        assert!(!outline.is_hole);
        assert_eq!(outline.points[0], Point::new(0.0, 0.0));
        assert_eq!(outline.points.len(), 14);
        assert_eq!(outline.area, 12.0);
        assert_eq!(outline.centroid, (2.0, 1.5));
    }

    #[test]
    fn ring_yields_outer_and_hole_borders() {
        let image = image_with(12, 12, |x, y| {
            (2..10).contains(&x) && (2..10).contains(&y) && !((4..8).contains(&x) && (4..8).contains(&y))
        });
        let outlines = trace_borders(&image);
        assert_eq!(outlines.len(), 2);
        assert!(!outlines[0].is_hole);
        assert!(outlines[1].is_hole);
        assert_eq!(outlines[0].area, 49.0);
        assert!(outlines[1].area > 0.0 && outlines[1].area < outlines[0].area);
    }

    #[test]
    fn separate_regions_are_separate_outlines() {
        let image = image_with(20, 10, |x, y| (1..4).contains(&y) && ((1..4).contains(&x) || (10..15).contains(&x)));
        let outlines = trace_borders(&image);
        assert_eq!(outlines.len(), 2);
        assert!(outlines[0].centroid.0 < outlines[1].centroid.0);
    }

    #[test]
    fn radius_bounds_filter_outlines() {
        let mut finder = open_finder();
        finder.set_min_area_radius(20.0);
        finder.set_max_area_radius(100.0);

        let huge = Outline {
            area: PI * 150.0 * 150.0,
            ..Outline::new(vec![Point::new(0.0, 0.0)], false)
        };
        let tiny = Outline {
            area: PI * 5.0 * 5.0,
            ..huge.clone()
        };
        let fits = Outline {
            area: PI * 50.0 * 50.0,
            ..huge.clone()
        };
        assert!(!finder.accepts(&huge));
        assert!(!finder.accepts(&tiny));
        assert!(finder.accepts(&fits));
    }

    #[test]
    fn extraction_is_deterministic() {
        let image = image_with(64, 48, |x, y| {
            let (dx, dy) = (x as i32 - 20, y as i32 - 20);
            dx * dx + dy * dy < 100 || ((40..55).contains(&x) && (10..40).contains(&y))
        });
        let mut finder = open_finder();
        finder.set_threshold(40);
        let first = finder.find_outlines(&image);
        let second = finder.find_outlines(&image);
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.area.to_bits(), b.area.to_bits());
        }
    }

    #[test]
    fn contours_keep_labels_across_frames() {
        let mut finder = open_finder();
        let frame_a = image_with(40, 20, |x, y| (5..10).contains(&x) && (5..10).contains(&y));
        let frame_b = image_with(40, 20, |x, y| (7..12).contains(&x) && (5..10).contains(&y));
        let first = finder.find_contours(&frame_a);
        let second = finder.find_contours(&frame_b);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].label, second[0].label);
    }

    #[test]
    fn largest_contour_wins_and_ties_go_to_the_first() {
        let contour = |label: u32, area: f64| Contour {
            label,
            outline: Outline {
                area,
                ..Outline::new(vec![Point::new(0.0, 0.0)], false)
            },
        };
        assert_eq!(select_largest(&[]), None);
        assert_eq!(select_largest(&[contour(0, 0.0)]), None);
        assert_eq!(select_largest(&[contour(0, 4.0), contour(1, 9.0), contour(2, 9.0)]), Some(1));
    }
}
