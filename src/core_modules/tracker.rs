// THEORY:
// The `tracker` module adds object permanence to the spatial layer. It takes the
// stateless list of outlines found in one frame and associates them with the
// identities it was already tracking.
//
// Lifecycle of an identity:
// - **Birth**: an outline that matches no existing identity gets a fresh label.
// - **Tracking**: a match refreshes the identity's position and resets its miss count.
// - **Occlusion**: an identity that goes unmatched keeps its label while its miss
//   count stays below the persistence window, so a person who briefly leaves the
//   mask comes back under the same label.
// - **Death**: on the miss that reaches the persistence window the identity is
//   dropped and its label is never reused. With a window of W frames an identity
//   survives W-1 consecutive misses and is gone on the W-th. ofxCv's tracker keeps
//   an identity while `lastSeen < persistence` and so drops it one frame later; a
//   window carried over from an ofxCv setup behaves one frame shorter here.
//
// Association is a greedy global nearest-centroid match: all (identity, outline)
// pairs within the maximum distance are sorted by distance and taken in order.
// Ties are broken by label and then by outline order, so identical input always
// yields identical labels.

use std::collections::HashSet;

pub const DEFAULT_PERSISTENCE: u32 = 150;
pub const DEFAULT_MAX_DISTANCE: f64 = 64.0;

/// An identity the tracker is currently holding, seen or not.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedContour {
    /// Persistent label, unique for the lifetime of the tracker.
    pub label: u32,
    /// Centroid at the last frame this identity was seen.
    pub centroid: (f64, f64),
    /// Number of frames this identity has been matched, including its birth frame.
    pub age: u32,
    /// Consecutive frames without a match.
    pub frames_since_seen: u32,
}

impl TrackedContour {
    fn new(label: u32, centroid: (f64, f64)) -> Self {
        Self {
            label,
            centroid,
            age: 1,
            frames_since_seen: 0,
        }
    }

    fn update(&mut self, centroid: (f64, f64)) {
        self.centroid = centroid;
        self.age += 1;
        self.frames_since_seen = 0;
    }
}

/// Manages identities from one frame to the next.
#[derive(Debug, Clone)]
pub struct Tracker {
    tracked: Vec<TrackedContour>,
    next_label: u32,
    persistence: u32,
    max_distance: f64,
    current_labels: Vec<u32>,
    new_labels: Vec<u32>,
    dead_labels: Vec<u32>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_PERSISTENCE, DEFAULT_MAX_DISTANCE)
    }
}

impl Tracker {
    pub fn new(persistence: u32, max_distance: f64) -> Self {
        Self {
            tracked: Vec::new(),
            next_label: 0,
            persistence: persistence.max(1),
            max_distance,
            current_labels: Vec::new(),
            new_labels: Vec::new(),
            dead_labels: Vec::new(),
        }
    }

    pub fn set_persistence(&mut self, frames: u32) {
        self.persistence = frames.max(1);
    }

    pub fn set_max_distance(&mut self, distance: f64) {
        self.max_distance = distance;
    }

    pub fn persistence(&self) -> u32 {
        self.persistence
    }

    /// Matches this frame's centroids against the tracked identities.
    /// Returns one label per centroid, in the same order.
    pub fn update(&mut self, centroids: &[(f64, f64)]) -> Vec<u32> {
        // --- 1. Matching ---
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new(); // (distance, tracked_index, centroid_index)
        for (i, tracked) in self.tracked.iter().enumerate() {
            for (j, centroid) in centroids.iter().enumerate() {
                let dist = ((tracked.centroid.0 - centroid.0).powi(2)
                    + (tracked.centroid.1 - centroid.1).powi(2))
                .sqrt();
                if dist <= self.max_distance {
                    candidates.push((dist, i, j));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| self.tracked[a.1].label.cmp(&self.tracked[b.1].label))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut labels: Vec<Option<u32>> = vec![None; centroids.len()];
        let mut matched_tracked: HashSet<usize> = HashSet::new();
        for (_, i, j) in candidates {
            if labels[j].is_some() || matched_tracked.contains(&i) {
                continue;
            }
            labels[j] = Some(self.tracked[i].label);
            matched_tracked.insert(i);
            self.tracked[i].update(centroids[j]);
        }

        // --- 2. Occlusion and death ---
        self.dead_labels.clear();
        let persistence = self.persistence;
        let mut survivors = Vec::with_capacity(self.tracked.len());
        for (i, mut tracked) in self.tracked.drain(..).enumerate() {
            if !matched_tracked.contains(&i) {
                tracked.frames_since_seen += 1;
                if tracked.frames_since_seen >= persistence {
                    self.dead_labels.push(tracked.label);
                    continue;
                }
            }
            survivors.push(tracked);
        }
        self.tracked = survivors;

        // --- 3. Birth ---
        self.new_labels.clear();
        let labels: Vec<u32> = labels
            .into_iter()
            .zip(centroids)
            .map(|(label, centroid)| match label {
                Some(label) => label,
                None => {
                    let label = self.next_label;
                    self.next_label += 1;
                    self.tracked.push(TrackedContour::new(label, *centroid));
                    self.new_labels.push(label);
                    label
                }
            })
            .collect();

        self.current_labels = labels.clone();
        labels
    }

    /// Labels of the outlines seen in the last update, in outline order.
    pub fn current_labels(&self) -> &[u32] {
        &self.current_labels
    }

    /// Labels born in the last update.
    pub fn new_labels(&self) -> &[u32] {
        &self.new_labels
    }

    /// Labels dropped in the last update.
    pub fn dead_labels(&self) -> &[u32] {
        &self.dead_labels
    }

    /// Every identity still held, including ones currently unseen.
    pub fn tracked(&self) -> &[TrackedContour] {
        &self.tracked
    }

    pub fn get(&self, label: u32) -> Option<&TrackedContour> {
        self.tracked.iter().find(|t| t.label == label)
    }

    /// True while `label` is held, whether or not it was seen this frame.
    pub fn is_present(&self, label: u32) -> bool {
        self.get(label).is_some()
    }

    /// Forgets every identity. Labels keep increasing.
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.current_labels.clear();
        self.new_labels.clear();
        self.dead_labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_outlines_get_fresh_labels() {
        let mut tracker = Tracker::default();
        let labels = tracker.update(&[(10.0, 10.0), (200.0, 200.0)]);
        assert_eq!(labels, vec![0, 1]);
        assert_eq!(tracker.new_labels(), &[0, 1]);
    }

    #[test]
    fn nearby_outline_keeps_its_label() {
        let mut tracker = Tracker::default();
        tracker.update(&[(10.0, 10.0), (200.0, 200.0)]);
        let labels = tracker.update(&[(205.0, 198.0), (14.0, 12.0)]);
        assert_eq!(labels, vec![1, 0]);
        assert!(tracker.new_labels().is_empty());
        assert_eq!(tracker.get(0).map(|t| t.age), Some(2));
    }

    #[test]
    fn distant_outline_is_a_new_identity() {
        let mut tracker = Tracker::new(150, 64.0);
        tracker.update(&[(10.0, 10.0)]);
        let labels = tracker.update(&[(300.0, 10.0)]);
        assert_eq!(labels, vec![1]);
        assert!(tracker.is_present(0));
    }

    #[test]
    fn identity_survives_gaps_shorter_than_the_window() {
        let window = 5;
        let mut tracker = Tracker::new(window, 64.0);
        tracker.update(&[(50.0, 50.0)]);
        for _ in 0..window - 1 {
            tracker.update(&[]);
            assert!(tracker.is_present(0));
        }
        assert_eq!(tracker.get(0).map(|t| t.frames_since_seen), Some(window - 1));
        let labels = tracker.update(&[(52.0, 51.0)]);
        assert_eq!(labels, vec![0]);
        assert_eq!(tracker.get(0).map(|t| t.frames_since_seen), Some(0));
    }

    #[test]
    fn identity_dies_after_a_full_window_of_misses() {
        let window = 5;
        let mut tracker = Tracker::new(window, 64.0);
        tracker.update(&[(50.0, 50.0)]);
        for _ in 0..window - 1 {
            tracker.update(&[]);
        }
        tracker.update(&[]);
        assert!(!tracker.is_present(0));
        assert_eq!(tracker.dead_labels(), &[0]);

        let labels = tracker.update(&[(50.0, 50.0)]);
        assert_eq!(labels, vec![1]);
    }

    #[test]
    fn window_of_one_drops_on_the_first_miss() {
        let mut tracker = Tracker::new(1, 64.0);
        tracker.update(&[(10.0, 10.0)]);
        tracker.update(&[]);
        assert!(!tracker.is_present(0));
        assert_eq!(tracker.dead_labels(), &[0]);
        assert!(tracker.current_labels().is_empty());
    }

    #[test]
    fn closest_pair_wins_contested_matches() {
        let mut tracker = Tracker::default();
        tracker.update(&[(0.0, 0.0), (40.0, 0.0)]);
        let labels = tracker.update(&[(35.0, 0.0)]);
        assert_eq!(labels, vec![1]);
        assert_eq!(tracker.get(0).map(|t| t.frames_since_seen), Some(1));
    }

    #[test]
    fn identical_input_yields_identical_labels() {
        let frames = [
            vec![(10.0, 10.0), (12.0, 10.0)],
            vec![(11.0, 10.0), (11.0, 10.0)],
            vec![(11.0, 11.0)],
        ];
        let run = || {
            let mut tracker = Tracker::default();
            frames.iter().map(|f| tracker.update(f)).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
