//! Time-indexed markers and the normalisation used to match them against
//! live playback progress.
//!
//! A marker's `percentage` is derived as `position / duration` when the marker
//! is created (or its position is explicitly updated) and is never re-derived
//! afterwards. Should the duration of a source change after markers were
//! placed, for example while a stream is still arriving, the stored
//! percentages keep pointing at the old fractions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Result, WaveplayError};

/// A named point on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    /// Absolute time in seconds.
    pub position: f64,
    /// `position / duration` at creation time.
    pub percentage: f64,
    pub color: Option<String>,
    pub width: Option<f64>,
}

/// Options accepted by `mark`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkOptions {
    /// Defaults to the next `_mN` id.
    pub id: Option<String>,
    /// Defaults to the current playback time.
    pub position: Option<f64>,
    pub color: Option<String>,
    pub width: Option<f64>,
    /// Re-centre the view on the marker when placed while paused.
    pub center: bool,
}

impl MarkOptions {
    pub fn at(position: f64) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// In-place modification of an existing marker. Omitted fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerUpdate {
    /// Moves the marker and recomputes its percentage.
    pub position: Option<f64>,
    pub color: Option<String>,
    pub width: Option<f64>,
    pub center: bool,
}

/// Index of the grid cell `progress` rounds to on a grid of `resolution`
/// steps. Live progress and markers match when they share a bucket.
pub fn progress_bucket(progress: f64, resolution: u32) -> i64 {
    (progress * f64::from(resolution.max(1))).round() as i64
}

/// Markers keyed by id, iterated in registration order.
#[derive(Debug, Default, Clone)]
pub struct MarkerRegistry {
    markers: IndexMap<String, Marker>,
    next_auto_id: usize,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Marker> {
        self.markers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Creates a marker, or overwrites the one with the same id in place
    /// (keeping its registration slot).
    pub fn mark(
        &mut self,
        options: &MarkOptions,
        current_time: f64,
        duration: f64,
    ) -> Result<Marker> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(WaveplayError::NotReady);
        }
        let position = options.position.unwrap_or(current_time);
        if !position.is_finite() || position < 0.0 {
            return Err(WaveplayError::InvalidInput(
                "marker position must be a non-negative number of seconds",
            ));
        }

        let id = match &options.id {
            Some(id) => id.clone(),
            None => self.next_id(),
        };
        let marker = Marker {
            id: id.clone(),
            position,
            percentage: position / duration,
            color: options.color.clone(),
            width: options.width,
        };
        self.markers.insert(id, marker.clone());
        Ok(marker)
    }

    /// Applies `update` to the marker `id`. The percentage is only recomputed
    /// when a new position is supplied.
    pub fn update(
        &mut self,
        id: &str,
        update: &MarkerUpdate,
        duration: f64,
    ) -> Result<Option<Marker>> {
        let Some(marker) = self.markers.get_mut(id) else {
            return Ok(None);
        };

        if let Some(position) = update.position {
            if !position.is_finite() || position < 0.0 {
                return Err(WaveplayError::InvalidInput(
                    "marker position must be a non-negative number of seconds",
                ));
            }
            if !duration.is_finite() || duration <= 0.0 {
                return Err(WaveplayError::NotReady);
            }
            marker.position = position;
            marker.percentage = position / duration;
        }
        if let Some(color) = &update.color {
            marker.color = Some(color.clone());
        }
        if let Some(width) = update.width {
            marker.width = Some(width);
        }
        Ok(Some(marker.clone()))
    }

    pub fn remove(&mut self, id: &str) -> Option<Marker> {
        self.markers.shift_remove(id)
    }

    /// Drops every marker and restarts automatic ids at `_m0`.
    pub fn clear(&mut self) {
        self.markers.clear();
        self.next_auto_id = 0;
    }

    /// Markers crossed when playback moves from bucket `previous` to bucket
    /// `current`, ordered by bucket and then by registration.
    ///
    /// Moving forward fires every bucket in `(previous, current]`, so markers
    /// are not skipped when a tick jumps several grid cells. Staying inside a
    /// bucket or moving backwards fires nothing. Without a previous bucket
    /// only markers in `current` match.
    pub fn crossed(&self, previous: Option<i64>, current: i64, resolution: u32) -> Vec<Marker> {
        let lower = match previous {
            Some(previous) if previous >= current => return Vec::new(),
            Some(previous) => previous + 1,
            None => current,
        };

        let mut hits: Vec<(i64, &Marker)> = self
            .markers
            .values()
            .map(|marker| (progress_bucket(marker.percentage, resolution), marker))
            .filter(|(bucket, _)| (lower..=current).contains(bucket))
            .collect();
        hits.sort_by_key(|(bucket, _)| *bucket);
        hits.into_iter().map(|(_, marker)| marker.clone()).collect()
    }

    fn next_id(&mut self) -> String {
        let id = format!("_m{}", self.next_auto_id);
        self.next_auto_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(markers: &[Marker]) -> Vec<&str> {
        markers.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn percentage_is_fixed_at_creation() {
        let mut registry = MarkerRegistry::new();
        let marker = registry.mark(&MarkOptions::at(25.0), 0.0, 100.0).unwrap();
        assert_eq!(marker.percentage, 0.25);

        let recolor = MarkerUpdate {
            color: Some("red".into()),
            ..Default::default()
        };
        registry.update(&marker.id, &recolor, 50.0).unwrap();
        let stored = registry.get(&marker.id).unwrap();
        assert_eq!(stored.percentage, 0.25);
        assert_eq!(stored.color.as_deref(), Some("red"));
    }

    #[test]
    fn explicit_position_updates_recompute_percentage() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(10.0).with_id("intro"), 0.0, 100.0).unwrap();

        let update = MarkerUpdate {
            position: Some(30.0),
            ..Default::default()
        };
        let moved = registry.update("intro", &update, 60.0).unwrap().unwrap();
        assert_eq!(moved.position, 30.0);
        assert_eq!(moved.percentage, 0.5);
        assert!(registry.update("missing", &update, 60.0).unwrap().is_none());
    }

    #[test]
    fn auto_ids_count_up_and_reset_on_clear() {
        let mut registry = MarkerRegistry::new();
        let first = registry.mark(&MarkOptions::default(), 1.0, 10.0).unwrap();
        let named = registry.mark(&MarkOptions::at(2.0).with_id("named"), 1.0, 10.0).unwrap();
        let second = registry.mark(&MarkOptions::default(), 3.0, 10.0).unwrap();
        assert_eq!(
            [first.id.as_str(), named.id.as_str(), second.id.as_str()],
            ["_m0", "named", "_m1"]
        );
        assert_eq!(first.position, 1.0);

        registry.clear();
        assert!(registry.is_empty());
        let restarted = registry.mark(&MarkOptions::default(), 0.0, 10.0).unwrap();
        assert_eq!(restarted.id, "_m0");
    }

    #[test]
    fn overwriting_keeps_registration_order() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(1.0).with_id("a"), 0.0, 10.0).unwrap();
        registry.mark(&MarkOptions::at(1.0).with_id("b"), 0.0, 10.0).unwrap();
        let recolored = MarkOptions::at(1.0).with_id("a").with_color("blue");
        registry.mark(&recolored, 0.0, 10.0).unwrap();

        let order: Vec<_> = registry.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["a", "b"]);
        assert_eq!(registry.get("a").unwrap().color.as_deref(), Some("blue"));
    }

    #[test]
    fn rejects_unknown_duration_and_bad_positions() {
        let mut registry = MarkerRegistry::new();
        assert!(matches!(
            registry.mark(&MarkOptions::at(1.0), 0.0, 0.0),
            Err(WaveplayError::NotReady)
        ));
        assert!(registry.mark(&MarkOptions::at(f64::NAN), 0.0, 10.0).is_err());
        assert!(registry.mark(&MarkOptions::at(-1.0), 0.0, 10.0).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn progress_rounds_to_the_grid() {
        assert_eq!(progress_bucket(0.2512, 100), 25);
        assert_eq!(progress_bucket(0.2549, 100), 25);
        assert_eq!(progress_bucket(0.2551, 100), 26);
        assert_eq!(progress_bucket(0.5, 800), 400);
    }

    #[test]
    fn crossing_fires_each_bucket_once() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(50.0).with_id("half"), 0.0, 100.0).unwrap();

        assert_eq!(ids(&registry.crossed(Some(48), 49, 100)), Vec::<&str>::new());
        assert_eq!(ids(&registry.crossed(Some(49), 50, 100)), ["half"]);
        assert!(registry.crossed(Some(50), 50, 100).is_empty());
        assert!(registry.crossed(Some(50), 51, 100).is_empty());
    }

    #[test]
    fn crossing_catches_skipped_buckets_in_time_order() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(30.0).with_id("late"), 0.0, 100.0).unwrap();
        registry.mark(&MarkOptions::at(20.0).with_id("early"), 0.0, 100.0).unwrap();
        registry.mark(&MarkOptions::at(30.0).with_id("late-twin"), 0.0, 100.0).unwrap();

        let hits = registry.crossed(Some(10), 35, 100);
        assert_eq!(ids(&hits), ["early", "late", "late-twin"]);
    }

    #[test]
    fn crossing_without_history_only_matches_the_current_bucket() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(10.0).with_id("a"), 0.0, 100.0).unwrap();
        registry.mark(&MarkOptions::at(60.0).with_id("b"), 0.0, 100.0).unwrap();

        assert_eq!(ids(&registry.crossed(None, 60, 100)), ["b"]);
        assert!(registry.crossed(None, 30, 100).is_empty());
    }

    #[test]
    fn moving_backwards_fires_nothing() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(10.0).with_id("a"), 0.0, 100.0).unwrap();
        registry.mark(&MarkOptions::at(50.0).with_id("b"), 0.0, 100.0).unwrap();

        assert!(registry.crossed(Some(80), 10, 100).is_empty());
        assert!(registry.crossed(Some(50), 48, 100).is_empty());
    }

    #[test]
    fn remove_drops_a_single_marker() {
        let mut registry = MarkerRegistry::new();
        registry.mark(&MarkOptions::at(1.0).with_id("a"), 0.0, 10.0).unwrap();
        registry.mark(&MarkOptions::at(2.0).with_id("b"), 0.0, 10.0).unwrap();

        assert_eq!(registry.remove("a").map(|m| m.id), Some("a".to_string()));
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
    }
}
