//! Outline post-processing: moving-average smoothing and Douglas-Peucker simplification.
//!
//! Both functions treat their input as a closed polygon, so the window of the
//! smoother and the span of the simplifier wrap around from the last vertex to
//! the first.

use crate::core_modules::contour::Point;

/// Windowed moving average over the vertices of a closed outline.
///
/// `size` is the half-width of the window in vertices (fractional part dropped).
/// `shape` blends the side weights from triangular (0) to box (1).
/// A size below 2 leaves the outline unchanged.
pub fn smooth(points: &[Point], size: f32, shape: f32) -> Vec<Point> {
    let n = points.len();
    let size = (size.max(0.0) as usize).min(n);
    let shape = shape.clamp(0.0, 1.0);
    if size < 2 {
        return points.to_vec();
    }

    let weights: Vec<f32> = (0..size)
        .map(|j| 1.0 + (shape - 1.0) * j as f32 / size as f32)
        .collect();

    (0..n)
        .map(|i| {
            let mut sum = 1.0;
            let mut x = points[i].x;
            let mut y = points[i].y;
            for (j, weight) in weights.iter().enumerate().skip(1) {
                let left = points[(i + n - j) % n];
                let right = points[(i + j) % n];
                x += (left.x + right.x) * weight;
                y += (left.y + right.y) * weight;
                sum += 2.0 * weight;
            }
            Point::new(x / sum, y / sum)
        })
        .collect()
}

/// Removes every vertex whose distance from the simplified path is at most `tolerance`.
///
/// The outline is split at its first vertex and the vertex farthest from it, and
/// each half is reduced with Douglas-Peucker. Ties always go to the earliest
/// vertex, so simplifying an already simplified outline with the same tolerance
/// returns it unchanged.
pub fn simplify(points: &[Point], tolerance: f32) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let tolerance = tolerance.max(0.0) as f64;

    let origin = points[0];
    let mut far = 0;
    let mut far_distance = 0.0;
    for (i, p) in points.iter().enumerate().skip(1) {
        let d = distance(origin, *p);
        if d > far_distance {
            far_distance = d;
            far = i;
        }
    }
    if far == 0 {
        return vec![origin];
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[far] = true;

    let first_half: Vec<usize> = (0..=far).collect();
    let second_half: Vec<usize> = (far..n).chain(std::iter::once(0)).collect();
    douglas_peucker(points, &first_half, tolerance, &mut keep);
    douglas_peucker(points, &second_half, tolerance, &mut keep);

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, kept)| kept.then_some(*p))
        .collect()
}

fn douglas_peucker(points: &[Point], chain: &[usize], tolerance: f64, keep: &mut [bool]) {
    let mut spans = vec![(0, chain.len() - 1)];
    while let Some((start, end)) = spans.pop() {
        if end <= start + 1 {
            continue;
        }
        let a = points[chain[start]];
        let b = points[chain[end]];
        let mut worst = start;
        let mut worst_distance = 0.0;
        for k in start + 1..end {
            let d = segment_distance(points[chain[k]], a, b);
            if d > worst_distance {
                worst_distance = d;
                worst = k;
            }
        }
        if worst_distance > tolerance {
            keep[chain[worst]] = true;
            spans.push((start, worst));
            spans.push((worst, end));
        }
    }
}

fn distance(a: Point, b: Point) -> f64 {
    let dx = a.x as f64 - b.x as f64;
    let dy = a.y as f64 - b.y as f64;
    (dx * dx + dy * dy).sqrt()
}

fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = (p.x as f64, p.y as f64);
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (vx, vy) = (bx - ax, by - ay);
    let length_sq = vx * vx + vy * vy;
    if length_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((px - ax) * vx + (py - ay) * vy) / length_sq).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * vx, ay + t * vy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}
