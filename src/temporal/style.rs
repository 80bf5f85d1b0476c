//! Temporal styling of features against the timeline cursor.
//!
//! During playback a feature fades out linearly over the trail window
//! after its date and is flagged stale once it passes the intermediate
//! threshold. Outside playback only exact-day matches are shown.

use crate::config::TimelineConfig;
use crate::models::AggregatedFeature;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::dates::extract_date;

/// Process-wide timeline control state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineState {
    /// Date picked on the scrubber; `None` shows the static view.
    pub selected_date: Option<NaiveDate>,
    /// Whether the timeline is animating.
    pub is_playing: bool,
}

/// Ref-tracked animation date.
///
/// Ticks write here first, so restyling during playback never lags one
/// frame behind the committed [`TimelineState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimationCursor {
    current: Option<NaiveDate>,
}

impl AnimationCursor {
    pub fn advance(&mut self, date: NaiveDate) {
        self.current = Some(date);
    }

    pub fn current(&self) -> Option<NaiveDate> {
        self.current
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl TimelineState {
    /// Date styling should use: the animation cursor while playing,
    /// the committed selection otherwise.
    pub fn effective_date(&self, cursor: &AnimationCursor) -> Option<NaiveDate> {
        if self.is_playing {
            cursor.current().or(self.selected_date)
        } else {
            self.selected_date
        }
    }
}

/// Opacity and stale flag for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStyle {
    pub opacity: f64,
    pub stale: bool,
}

impl FeatureStyle {
    const fn new(opacity: f64, stale: bool) -> Self {
        Self { opacity, stale }
    }
}

/// Fade window parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeWindow {
    /// Trail length in days.
    pub fade_days: i64,
    /// Age in days beyond which a trailing feature is stale.
    pub stale_after_days: i64,
    /// Opacity of every feature when no date is selected.
    pub static_opacity: f64,
}

impl Default for FadeWindow {
    fn default() -> Self {
        Self {
            fade_days: 7,
            stale_after_days: 3,
            static_opacity: 0.8,
        }
    }
}

impl From<&TimelineConfig> for FadeWindow {
    fn from(config: &TimelineConfig) -> Self {
        Self {
            fade_days: config.fade_days.max(1),
            stale_after_days: config.stale_after_days.max(0),
            static_opacity: config.static_opacity.clamp(0.0, 1.0),
        }
    }
}

impl FadeWindow {
    /// Style for a feature date relative to the selected date.
    pub fn style_for_date(
        &self,
        feature_date: Option<NaiveDate>,
        selected_date: Option<NaiveDate>,
        is_playing: bool,
    ) -> FeatureStyle {
        let Some(selected) = selected_date else {
            return FeatureStyle::new(self.static_opacity, false);
        };
        let Some(date) = feature_date else {
            return FeatureStyle::new(0.0, false);
        };
        if date == selected {
            return FeatureStyle::new(1.0, false);
        }
        if !is_playing {
            return FeatureStyle::new(0.0, false);
        }

        // Negative when the feature lies in the past.
        let days_diff = (date - selected).num_days();
        if days_diff > 0 {
            return FeatureStyle::new(0.0, false);
        }
        if days_diff < -self.fade_days {
            return FeatureStyle::new(0.0, true);
        }

        let opacity = ((self.fade_days + days_diff) as f64 / self.fade_days as f64).max(0.0);
        FeatureStyle::new(opacity, -days_diff > self.stale_after_days)
    }

    /// Style of a feature, resolving its date from the feature itself.
    pub fn style_of(
        &self,
        feature: &AggregatedFeature,
        selected_date: Option<NaiveDate>,
        is_playing: bool,
    ) -> FeatureStyle {
        let date = feature
            .earliest_date
            .or_else(|| extract_date(&feature.properties));
        self.style_for_date(date, selected_date, is_playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn feature_at(day: Option<NaiveDate>) -> AggregatedFeature {
        AggregatedFeature {
            coordinates: [0.0, 0.0],
            properties: Map::new(),
            source_metric_id: "m1".to_string(),
            is_aggregated: false,
            count: 1,
            scale: 0.4,
            earliest_date: day,
        }
    }

    #[test]
    fn test_no_selection_is_static_view() {
        let style = FadeWindow::default().style_for_date(Some(date(2024, 6, 1)), None, true);
        assert_eq!(style, FeatureStyle::new(0.8, false));
    }

    #[test]
    fn test_undated_feature_hidden() {
        let style = FadeWindow::default().style_for_date(None, Some(date(2024, 6, 10)), true);
        assert_eq!(style, FeatureStyle::new(0.0, false));
    }

    #[test]
    fn test_exact_match_always_visible() {
        let window = FadeWindow::default();
        let day = date(2024, 6, 10);
        assert_eq!(
            window.style_for_date(Some(day), Some(day), false),
            FeatureStyle::new(1.0, false)
        );
        assert_eq!(
            window.style_for_date(Some(day), Some(day), true),
            FeatureStyle::new(1.0, false)
        );
    }

    #[test]
    fn test_three_days_back_while_playing() {
        let style = FadeWindow::default().style_of(
            &feature_at(Some(date(2024, 6, 7))),
            Some(date(2024, 6, 10)),
            true,
        );
        assert!((style.opacity - 4.0 / 7.0).abs() < 1e-9);
        assert!((style.opacity - 0.571).abs() < 1e-3);
        assert!(!style.stale);
    }

    #[test]
    fn test_three_days_back_when_paused() {
        let style = FadeWindow::default().style_of(
            &feature_at(Some(date(2024, 6, 7))),
            Some(date(2024, 6, 10)),
            false,
        );
        assert_eq!(style, FeatureStyle::new(0.0, false));
    }

    #[test]
    fn test_stale_after_threshold() {
        let style = FadeWindow::default().style_for_date(
            Some(date(2024, 6, 6)),
            Some(date(2024, 6, 10)),
            true,
        );
        assert!((style.opacity - 3.0 / 7.0).abs() < 1e-9);
        assert!(style.stale);
    }

    #[test]
    fn test_beyond_window_and_future() {
        let window = FadeWindow::default();
        let selected = Some(date(2024, 6, 10));

        let old = window.style_for_date(Some(date(2024, 6, 2)), selected, true);
        assert_eq!(old, FeatureStyle::new(0.0, true));

        let future = window.style_for_date(Some(date(2024, 6, 11)), selected, true);
        assert_eq!(future, FeatureStyle::new(0.0, false));
    }

    #[test]
    fn test_fade_is_monotonic() {
        let window = FadeWindow::default();
        let selected = date(2024, 6, 10);
        let mut previous = f64::INFINITY;

        for days_back in 0..=window.fade_days {
            let day = selected - Duration::days(days_back);
            let style = window.style_for_date(Some(day), Some(selected), true);
            assert!(style.opacity <= previous);
            assert!((0.0..=1.0).contains(&style.opacity));
            previous = style.opacity;
        }
        assert_eq!(previous, 0.0);

        for days_back in (window.fade_days + 1)..30 {
            let day = selected - Duration::days(days_back);
            assert_eq!(
                window.style_for_date(Some(day), Some(selected), true).opacity,
                0.0
            );
        }
    }

    #[test]
    fn test_custom_window() {
        let window = FadeWindow::from(&TimelineConfig {
            fade_days: 14,
            stale_after_days: 7,
            static_opacity: 0.5,
            tick_millis: 0,
        });
        let selected = Some(date(2024, 6, 15));
        let style = window.style_for_date(Some(date(2024, 6, 8)), selected, true);
        assert!((style.opacity - 0.5).abs() < 1e-9);
        assert!(!style.stale);
        assert_eq!(window.style_for_date(None, None, false).opacity, 0.5);
    }

    #[test]
    fn test_effective_date_prefers_cursor_while_playing() {
        let mut cursor = AnimationCursor::default();
        let mut timeline = TimelineState {
            selected_date: Some(date(2024, 6, 1)),
            is_playing: true,
        };
        assert_eq!(timeline.effective_date(&cursor), Some(date(2024, 6, 1)));

        cursor.advance(date(2024, 6, 5));
        assert_eq!(timeline.effective_date(&cursor), Some(date(2024, 6, 5)));

        timeline.is_playing = false;
        assert_eq!(timeline.effective_date(&cursor), Some(date(2024, 6, 1)));
    }
}
