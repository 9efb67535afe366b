use crate::math;
use crate::region::Region;
use crate::shot::{ShotHeight, ShotShape, StartingLine};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionLevel {
    Tight,
    Medium,
    Wide,
    Maximum,
}

impl ExpansionLevel {
    pub const ALL: [ExpansionLevel; 4] = [
        ExpansionLevel::Tight,
        ExpansionLevel::Medium,
        ExpansionLevel::Wide,
        ExpansionLevel::Maximum,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExpansionLevel::Tight => "tight",
            ExpansionLevel::Medium => "medium",
            ExpansionLevel::Wide => "wide",
            ExpansionLevel::Maximum => "maximum",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Width multiplier applied to the base region, `None` for the
    /// absolute maximum window.
    pub fn multiplier(&self) -> Option<f32> {
        match self {
            ExpansionLevel::Tight => Some(1.0),
            ExpansionLevel::Medium => Some(2.0),
            ExpansionLevel::Wide => Some(3.0),
            ExpansionLevel::Maximum => None,
        }
    }

    pub fn next(&self) -> Option<ExpansionLevel> {
        match self {
            ExpansionLevel::Tight => Some(ExpansionLevel::Medium),
            ExpansionLevel::Medium => Some(ExpansionLevel::Wide),
            ExpansionLevel::Wide => Some(ExpansionLevel::Maximum),
            ExpansionLevel::Maximum => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Searching(ExpansionLevel),
    Accepted(ExpansionLevel),
    Exhausted,
}

impl SearchState {
    #[inline]
    pub fn start() -> Self {
        SearchState::Searching(ExpansionLevel::Tight)
    }

    pub fn advance(self, accepted: bool) -> Self {
        match self {
            SearchState::Searching(level) if accepted => SearchState::Accepted(level),
            SearchState::Searching(level) => match level.next() {
                Some(next) => SearchState::Searching(next),
                None => SearchState::Exhausted,
            },
            terminal => terminal,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchState::Searching(_))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ValidationThresholds {
    pub min_color: f32,
    pub min_track: f32,
    pub min_direction: f32,
}

impl ValidationThresholds {
    pub fn accepts(&self, color: Option<f32>, track: f32, direction: f32) -> bool {
        color.map_or(true, |c| c >= self.min_color)
            && track >= self.min_track
            && direction >= self.min_direction
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub base: ValidationThresholds,
    pub ceiling: ValidationThresholds,
    pub strictness_step: f32,
    pub maximum_margin: f32,
    pub path_window_start: f32,
    pub path_window_end: f32,
    pub path_ramp_secs: f32,
    pub apex_timing: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base: ValidationThresholds {
                min_color: 0.3,
                min_track: 0.2,
                min_direction: 0.2,
            },
            ceiling: ValidationThresholds {
                min_color: 0.6,
                min_track: 0.5,
                min_direction: 0.5,
            },
            strictness_step: 0.1,
            maximum_margin: 20.0,
            path_window_start: 50.0,
            path_window_end: 80.0,
            path_ramp_secs: 0.5,
            apex_timing: 0.45,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct PathConstraints {
    pub origin: na::Point2<f32>,
    pub apex: Option<na::Point2<f32>>,
    pub landing: Option<na::Point2<f32>>,
    pub shape: ShotShape,
    pub height: ShotHeight,
    pub starting_line: StartingLine,
}

pub struct SearchExpansion {
    config: SearchConfig,
    origin: na::Point2<f32>,
    frame_width: u32,
    frame_height: u32,
}

impl SearchExpansion {
    pub fn new(config: SearchConfig, origin: na::Point2<f32>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            config,
            origin,
            frame_width,
            frame_height,
        }
    }

    pub fn region_for_level(&self, level: ExpansionLevel, base: &Region) -> Region {
        let (fw, fh) = (self.frame_width, self.frame_height);

        let region = match level.multiplier() {
            Some(m) => base.scaled(m),
            None => {
                let width = fw as f32 / 3.0;
                let left = (self.origin.x - width / 2.0).clamp(0.0, (fw as f32 - width).max(0.0));
                let bottom = (self.origin.y + self.config.maximum_margin).min(fh as f32);

                Region::new(left, 0.0, width, bottom)
            }
        };

        region.clip(fw, fh).unwrap_or(region)
    }

    /// Validation thresholds, stricter by `strictness_step` per level and capped.
    pub fn thresholds(&self, level: ExpansionLevel) -> ValidationThresholds {
        let k = 1.0 + self.config.strictness_step * level.index() as f32;
        let (base, cap) = (&self.config.base, &self.config.ceiling);

        ValidationThresholds {
            min_color: (base.min_color * k).min(cap.min_color),
            min_track: (base.min_track * k).min(cap.min_track),
            min_direction: (base.min_direction * k).min(cap.min_direction),
        }
    }

    pub fn expected_position(&self, c: &PathConstraints, elapsed: f32) -> na::Point2<f32> {
        let fw = self.frame_width as f32;
        let fh = self.frame_height as f32;
        let t = (elapsed / c.height.flight_duration()).clamp(0.0, 1.0);
        let apex_t = self.config.apex_timing.clamp(0.05, 0.95);

        let base = match (c.apex, c.landing) {
            (Some(apex), Some(landing)) => {
                if t <= apex_t {
                    let e = math::ease_out_quad(t / apex_t);
                    na::Point2::new(
                        math::lerp(c.origin.x, apex.x, e),
                        math::lerp(c.origin.y, apex.y, e),
                    )
                } else {
                    let u = (t - apex_t) / (1.0 - apex_t);
                    na::Point2::new(
                        math::lerp(apex.x, landing.x, u),
                        math::lerp(apex.y, landing.y, u),
                    )
                }
            }
            (Some(apex), None) => {
                let e = math::ease_out_quad((t / apex_t).min(1.0));
                na::Point2::new(
                    math::lerp(c.origin.x, apex.x, e),
                    math::lerp(c.origin.y, apex.y, e),
                )
            }
            (None, landing) => {
                let landing = landing.unwrap_or(c.origin);
                let arc = c.height.apex_rise() * fh * 4.0 * t * (1.0 - t);
                na::Point2::new(
                    math::lerp(c.origin.x, landing.x, t),
                    math::lerp(c.origin.y, landing.y, t) - arc,
                )
            }
        };

        let curve = c.shape.curve_factor() * 0.08 * fw * (std::f32::consts::PI * t).sin();
        let fade = (1.0 - elapsed / self.config.path_ramp_secs).clamp(0.0, 1.0);
        let start = c.starting_line.direction() * 0.03 * fw * fade;

        na::Point2::new(base.x + curve + start, base.y)
    }

    pub fn expected_path_window(&self, c: &PathConstraints, elapsed: f32) -> Region {
        let p = self.expected_position(c, elapsed);
        let ramp = (elapsed / self.config.path_ramp_secs).clamp(0.0, 1.0);
        let size = math::lerp(self.config.path_window_start, self.config.path_window_end, ramp);

        let region = Region::from_center(p.x, p.y, size, size);
        region
            .clip(self.frame_width, self.frame_height)
            .unwrap_or(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn expansion() -> SearchExpansion {
        SearchExpansion::new(SearchConfig::default(), na::Point2::new(320.0, 300.0), 640, 360)
    }

    fn constraints() -> PathConstraints {
        PathConstraints {
            origin: na::Point2::new(320.0, 300.0),
            apex: None,
            landing: Some(na::Point2::new(400.0, 250.0)),
            shape: ShotShape::Straight,
            height: ShotHeight::Medium,
            starting_line: StartingLine::Center,
        }
    }

    #[test]
    fn state_machine_walks_levels() {
        let mut state = SearchState::start();
        let mut visited = Vec::new();

        while let SearchState::Searching(level) = state {
            visited.push(level);
            state = state.advance(false);
        }

        assert_eq!(visited, ExpansionLevel::ALL.to_vec());
        assert_eq!(state, SearchState::Exhausted);
        assert_eq!(
            SearchState::Searching(ExpansionLevel::Medium).advance(true),
            SearchState::Accepted(ExpansionLevel::Medium)
        );
        assert!(SearchState::Exhausted.advance(true).is_terminal());
    }

    #[test]
    fn widths_strictly_increase() {
        let exp = expansion();
        let base = Region::from_center(330.0, 280.0, 40.0, 40.0);

        let widths: Vec<f32> = ExpansionLevel::ALL
            .iter()
            .map(|l| exp.region_for_level(*l, &base).w)
            .collect();

        assert!(widths.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn maximum_spans_top_to_origin() {
        let exp = expansion();
        let r = exp.region_for_level(ExpansionLevel::Maximum, &Region::new(0.0, 0.0, 10.0, 10.0));

        assert_abs_diff_eq!(r.w, 640.0 / 3.0, epsilon = 1.0);
        assert_eq!(r.top(), 0.0);
        assert!(r.bottom() >= 300.0);
        assert!(r.contains(na::Point2::new(320.0, 299.0)));
    }

    #[test]
    fn maximum_is_clamped_inside_frame() {
        let exp = SearchExpansion::new(SearchConfig::default(), na::Point2::new(10.0, 350.0), 640, 360);
        let r = exp.region_for_level(ExpansionLevel::Maximum, &Region::new(0.0, 0.0, 10.0, 10.0));

        assert_eq!(r.left(), 0.0);
        assert_abs_diff_eq!(r.w, 640.0 / 3.0, epsilon = 1.0);
        assert!(r.bottom() <= 360.0);
    }

    #[test]
    fn thresholds_tighten_and_cap() {
        let exp = expansion();
        let t0 = exp.thresholds(ExpansionLevel::Tight);
        let t3 = exp.thresholds(ExpansionLevel::Maximum);

        assert_abs_diff_eq!(t0.min_color, 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(t3.min_color, 0.39, epsilon = 1e-6);
        assert!(t3.min_track > t0.min_track);

        let strict = SearchExpansion::new(
            SearchConfig {
                strictness_step: 1.0,
                ..Default::default()
            },
            na::Point2::new(0.0, 0.0),
            100,
            100,
        );
        assert_abs_diff_eq!(strict.thresholds(ExpansionLevel::Maximum).min_color, 0.6);
    }

    #[test]
    fn validation_skips_missing_color() {
        let t = ValidationThresholds {
            min_color: 0.5,
            min_track: 0.2,
            min_direction: 0.2,
        };

        assert!(t.accepts(None, 0.3, 0.3));
        assert!(!t.accepts(Some(0.1), 0.3, 0.3));
        assert!(!t.accepts(Some(0.9), 0.1, 0.3));
    }

    #[test]
    fn path_window_grows_over_ramp() {
        let exp = expansion();
        let c = constraints();

        let w0 = exp.expected_path_window(&c, 0.0);
        let w1 = exp.expected_path_window(&c, 0.5);
        let w2 = exp.expected_path_window(&c, 2.0);

        assert_abs_diff_eq!(w0.w, 50.0, epsilon = 1e-3);
        assert_abs_diff_eq!(w1.w, 80.0, epsilon = 1e-3);
        assert_abs_diff_eq!(w2.w, 80.0, epsilon = 1e-3);
        assert!(w0.contains(c.origin));
    }

    #[test]
    fn path_rises_then_reaches_landing() {
        let exp = expansion();
        let c = constraints();

        let mid = exp.expected_position(&c, 4.5 / 2.0);
        let end = exp.expected_position(&c, 4.5);

        assert!(mid.y < 250.0);
        assert_abs_diff_eq!(end.x, 400.0, epsilon = 1e-3);
        assert_abs_diff_eq!(end.y, 250.0, epsilon = 1e-3);
    }

    #[test]
    fn apex_constraint_eases_into_apex() {
        let exp = expansion();
        let mut c = constraints();
        c.apex = Some(na::Point2::new(360.0, 100.0));

        let at_apex = exp.expected_position(&c, 4.5 * 0.45);
        assert_abs_diff_eq!(at_apex.x, 360.0, epsilon = 0.5);
        assert_abs_diff_eq!(at_apex.y, 100.0, epsilon = 0.5);

        let early = exp.expected_position(&c, 4.5 * 0.45 * 0.5);
        assert!(early.y < 200.0);
    }

    #[test]
    fn shape_bends_path_sideways() {
        let exp = expansion();
        let mut c = constraints();
        let straight = exp.expected_position(&c, 2.25);

        c.shape = ShotShape::Hook;
        let hook = exp.expected_position(&c, 2.25);

        c.shape = ShotShape::Slice;
        let slice = exp.expected_position(&c, 2.25);

        assert!(hook.x < straight.x && straight.x < slice.x);
    }

    #[test]
    fn starting_line_fades_out() {
        let exp = expansion();
        let mut c = constraints();
        c.starting_line = StartingLine::Right;

        let early = exp.expected_position(&c, 0.0);
        let late = exp.expected_position(&c, 0.6);
        c.starting_line = StartingLine::Center;
        let late_center = exp.expected_position(&c, 0.6);

        assert!(early.x > 320.0);
        assert_abs_diff_eq!(late.x, late_center.x, epsilon = 1e-4);
    }
}
