use crate::error::Error;
use crate::math;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMethod {
    Tracked,
    Physics,
    ApexConstrained,
    Manual,
}

impl TrajectoryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrajectoryMethod::Tracked => "tracked",
            TrajectoryMethod::Physics => "physics",
            TrajectoryMethod::ApexConstrained => "apex_constrained",
            TrajectoryMethod::Manual => "manual",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub timestamp: f32,
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
    pub interpolated: bool,
}

impl TrajectoryPoint {
    pub fn new(timestamp: f32, x: f32, y: f32, confidence: f32) -> Self {
        Self {
            timestamp,
            x,
            y,
            confidence,
            interpolated: false,
        }
    }

    #[inline(always)]
    pub fn position(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }
}

/// A point is normalized when both coordinates are at most 1, otherwise
/// both are pixels.
#[inline]
pub fn is_normalized(x: f32, y: f32) -> bool {
    x <= 1.0 && y <= 1.0
}

pub fn normalize(x: f32, y: f32, frame_width: u32, frame_height: u32) -> (f32, f32) {
    let (nx, ny) = if is_normalized(x, y) || frame_width == 0 || frame_height == 0 {
        (x, y)
    } else {
        (x / frame_width as f32, y / frame_height as f32)
    };

    (nx.clamp(0.0, 1.0), ny.clamp(0.0, 1.0))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Trajectory {
    pub points: Vec<TrajectoryPoint>,
    pub apex_index: usize,
    pub confidence: f32,
    pub smoothness: f32,
    pub physics_plausibility: f32,
    pub launch_angle: f32,
    pub flight_duration: f32,
    pub gap_count: usize,
    pub has_gaps: bool,
    pub manual_override: bool,
    pub method: TrajectoryMethod,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Trajectory {
    /// Builds a trajectory and derives its landmarks. Points are ordered
    /// by timestamp; repeated timestamps keep the first point.
    pub fn from_points(
        mut points: Vec<TrajectoryPoint>,
        frame_width: u32,
        frame_height: u32,
        method: TrajectoryMethod,
        confidence: Option<f32>,
    ) -> Self {
        points.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        points.dedup_by(|b, a| b.timestamp <= a.timestamp);

        for p in points.iter_mut() {
            p.x = p.x.clamp(0.0, 1.0);
            p.y = p.y.clamp(0.0, 1.0);
            p.confidence = p.confidence.clamp(0.0, 1.0);
        }

        let gap_count = points.iter().filter(|p| p.interpolated).count();
        let apex_index = apex_index(&points);
        let flight_duration = match (points.first(), points.last()) {
            (Some(a), Some(b)) => b.timestamp - a.timestamp,
            _ => 0.0,
        };

        let confidence = confidence
            .unwrap_or_else(|| tracked_confidence(&points))
            .clamp(0.0, 1.0);

        Self {
            launch_angle: launch_angle(&points, frame_width, frame_height),
            smoothness: smoothness(&points),
            physics_plausibility: physics_plausibility(&points),
            apex_index,
            confidence,
            flight_duration,
            gap_count,
            has_gaps: gap_count > 0,
            manual_override: false,
            method,
            frame_width,
            frame_height,
            points,
        }
    }

    pub fn with_manual_override(&self, points: Vec<TrajectoryPoint>) -> Result<Self, Error> {
        if points.len() < 2 {
            return Err(Error::InvalidInput(
                "manual trajectory needs at least two points".into(),
            ));
        }

        let points = points
            .into_iter()
            .map(|p| {
                let (x, y) = normalize(p.x, p.y, self.frame_width, self.frame_height);
                TrajectoryPoint { x, y, ..p }
            })
            .collect();

        let mut out = Self::from_points(
            points,
            self.frame_width,
            self.frame_height,
            TrajectoryMethod::Manual,
            Some(1.0),
        );
        out.manual_override = true;

        Ok(out)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn apex(&self) -> Option<&TrajectoryPoint> {
        self.points.get(self.apex_index)
    }

    /// `(timestamp, x, y)` in pixels of the source frame.
    pub fn to_pixels(&self) -> Vec<(f32, f32, f32)> {
        let (w, h) = (self.frame_width as f32, self.frame_height as f32);

        self.points
            .iter()
            .map(|p| (p.timestamp, p.x * w, p.y * h))
            .collect()
    }
}

fn apex_index(points: &[TrajectoryPoint]) -> usize {
    points
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.y.total_cmp(&b.1.y))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn tracked_confidence(points: &[TrajectoryPoint]) -> f32 {
    let detected: Vec<f32> = points
        .iter()
        .filter(|p| !p.interpolated)
        .map(|p| p.confidence)
        .collect();

    if detected.is_empty() {
        return 0.0;
    }

    let mean = detected.iter().sum::<f32>() / detected.len() as f32;
    let gap_fraction = 1.0 - detected.len() as f32 / points.len() as f32;

    mean * (1.0 - 0.5 * gap_fraction)
}

fn launch_angle(points: &[TrajectoryPoint], frame_width: u32, frame_height: u32) -> f32 {
    let (w, h) = (frame_width.max(1) as f32, frame_height.max(1) as f32);

    for seg in points.windows(2) {
        let dx = (seg[1].x - seg[0].x) * w;
        let rise = (seg[0].y - seg[1].y) * h;

        if dx.abs() > 1e-3 || rise.abs() > 1e-3 {
            return rise.atan2(dx.abs()).to_degrees();
        }
    }

    0.0
}

fn smoothness(points: &[TrajectoryPoint]) -> f32 {
    if points.len() < 3 {
        return 1.0;
    }

    let mut accel = 0.0f32;
    let mut step = 0.0f32;

    for w in points.windows(3) {
        let a = w[2].position().coords - 2.0 * w[1].position().coords + w[0].position().coords;
        accel += a.norm();
        step += (w[1].position() - w[0].position()).norm();
    }

    let n = (points.len() - 2) as f32;
    let ratio = (accel / n) / (step / n).max(1e-6);

    math::gauss(ratio, 0.5)
}

fn physics_plausibility(points: &[TrajectoryPoint]) -> f32 {
    if points.len() < 3 {
        return 0.5;
    }

    let t0 = points[0].timestamp as f64;
    let ts = na::DVector::from_iterator(points.len(), points.iter().map(|p| p.timestamp as f64 - t0));
    let ys = na::DVector::from_iterator(points.len(), points.iter().map(|p| p.y as f64));

    let fit = match math::quadratic_ls(&ts, &ys) {
        Some(p) => p,
        None => return 0.0,
    };

    let rss: f64 = ts
        .iter()
        .zip(ys.iter())
        .map(|(t, y)| {
            let e = fit[0] * t * t + fit[1] * t + fit[2] - y;
            e * e
        })
        .sum();
    let rms = (rss / points.len() as f64).sqrt() as f32;

    let (lo, hi) = points
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
    let fit_score = math::gauss(rms / (hi - lo).max(0.01), 0.1);

    let gravity_score = if fit[0] > 0.0 { 1.0 } else { 0.3 };

    let total_dx = points[points.len() - 1].x - points[0].x;
    let steps: Vec<f32> = points
        .windows(2)
        .map(|w| w[1].x - w[0].x)
        .filter(|d| d.abs() > 1e-4)
        .collect();
    let monotonic = if steps.is_empty() || total_dx.abs() < 1e-4 {
        1.0
    } else {
        steps.iter().filter(|d| d.signum() == total_dx.signum()).count() as f32
            / steps.len() as f32
    };

    (0.6 * fit_score + 0.2 * gravity_score + 0.2 * monotonic).clamp(0.0, 1.0)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AssemblerConfig {
    pub min_points: usize,
    pub max_gap: usize,
    pub interpolated_confidence: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_points: 6,
            max_gap: 5,
            interpolated_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FrameEvent {
    Detection {
        frame_index: usize,
        timestamp: f32,
        x: f32,
        y: f32,
        confidence: f32,
    },
    Gap {
        frame_index: usize,
        timestamp: f32,
    },
}

impl FrameEvent {
    #[inline]
    fn key(&self) -> (usize, f32) {
        match *self {
            FrameEvent::Detection {
                frame_index, timestamp, ..
            }
            | FrameEvent::Gap { frame_index, timestamp } => (frame_index, timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    timestamp: f32,
    x: f32,
    y: f32,
}

pub struct TrajectoryAssembler {
    config: AssemblerConfig,
    frame_width: u32,
    frame_height: u32,
    anchor: Option<Anchor>,
    events: Vec<FrameEvent>,
}

impl TrajectoryAssembler {
    pub fn new(config: AssemblerConfig, frame_width: u32, frame_height: u32) -> Self {
        Self {
            config,
            frame_width,
            frame_height,
            anchor: None,
            events: Vec::new(),
        }
    }

    /// Fixes the first point of the path (the ball at rest) with full
    /// confidence. Frame events must come after it in time.
    pub fn anchor(&mut self, timestamp: f32, x: f32, y: f32) {
        let (x, y) = normalize(x, y, self.frame_width, self.frame_height);
        self.anchor = Some(Anchor { timestamp, x, y });
    }

    pub fn detections(&self) -> usize {
        self.anchor.iter().count()
            + self
                .events
                .iter()
                .filter(|e| matches!(e, FrameEvent::Detection { .. }))
                .count()
    }

    pub fn gaps(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, FrameEvent::Gap { .. }))
            .count()
    }

    pub fn clear(&mut self) {
        self.anchor = None;
        self.events.clear();
    }

    fn accepts(&self, frame_index: usize, timestamp: f32) -> bool {
        let after_last = match self.events.last().map(FrameEvent::key) {
            Some((li, lt)) => li < frame_index && lt < timestamp,
            None => true,
        };
        let after_anchor = self.anchor.map_or(true, |a| a.timestamp < timestamp);

        if !(after_last && after_anchor) {
            debug!(frame_index, timestamp, "out of order frame event dropped");
        }

        after_last && after_anchor
    }

    pub fn push_detection(&mut self, frame_index: usize, timestamp: f32, x: f32, y: f32, confidence: f32) {
        if !self.accepts(frame_index, timestamp) {
            return;
        }

        let (x, y) = normalize(x, y, self.frame_width, self.frame_height);

        self.events.push(FrameEvent::Detection {
            frame_index,
            timestamp,
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
        });
    }

    pub fn push_gap(&mut self, frame_index: usize, timestamp: f32) {
        if self.accepts(frame_index, timestamp) {
            self.events.push(FrameEvent::Gap { frame_index, timestamp });
        }
    }

    /// Stitches the events into a trajectory, `None` when fewer than
    /// `min_points` points survive gap filling.
    pub fn assemble(&self) -> Option<Trajectory> {
        let mut points = Vec::with_capacity(self.events.len() + 1);
        let mut pending: Vec<f32> = Vec::new();
        let mut last: Option<(f32, f32, f32, f32)> = None;

        if let Some(a) = self.anchor {
            points.push(TrajectoryPoint::new(a.timestamp, a.x, a.y, 1.0));
            last = Some((a.timestamp, a.x, a.y, 1.0));
        }

        for event in &self.events {
            match *event {
                FrameEvent::Gap { timestamp, .. } => {
                    if last.is_some() {
                        pending.push(timestamp);
                    }
                }
                FrameEvent::Detection {
                    timestamp,
                    x,
                    y,
                    confidence,
                    ..
                } => {
                    if let Some((lt, lx, ly, lc)) = last {
                        if !pending.is_empty() && pending.len() <= self.config.max_gap {
                            let span = timestamp - lt;
                            let conf = lc.min(confidence) * self.config.interpolated_confidence;

                            for &gt in &pending {
                                let u = (gt - lt) / span;
                                points.push(TrajectoryPoint {
                                    timestamp: gt,
                                    x: math::lerp(lx, x, u),
                                    y: math::lerp(ly, y, u),
                                    confidence: conf,
                                    interpolated: true,
                                });
                            }
                        } else if !pending.is_empty() {
                            debug!(run = pending.len(), "gap too long to interpolate");
                        }
                    }

                    pending.clear();
                    points.push(TrajectoryPoint::new(timestamp, x, y, confidence));
                    last = Some((timestamp, x, y, confidence));
                }
            }
        }

        if points.len() < self.config.min_points {
            debug!(
                points = points.len(),
                required = self.config.min_points,
                "not enough points to assemble trajectory"
            );
            return None;
        }

        Some(Trajectory::from_points(
            points,
            self.frame_width,
            self.frame_height,
            TrajectoryMethod::Tracked,
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assembler() -> TrajectoryAssembler {
        TrajectoryAssembler::new(AssemblerConfig::default(), 640, 360)
    }

    fn at(i: usize) -> f32 {
        i as f32 / 30.0
    }

    fn parabola(i: usize) -> (f32, f32) {
        let t = i as f32 / 10.0;
        (0.1 + 0.08 * t * 10.0, 0.9 - 1.6 * t + 1.6 * t * t)
    }

    #[test]
    fn gaps_are_interpolated() {
        let mut asm = assembler();
        asm.push_detection(0, at(0), 0.10, 0.80, 0.9);
        asm.push_detection(1, at(1), 0.12, 0.76, 0.9);
        asm.push_gap(2, at(2));
        asm.push_detection(3, at(3), 0.16, 0.70, 0.8);
        asm.push_gap(4, at(4));
        asm.push_detection(5, at(5), 0.20, 0.66, 0.8);

        let traj = asm.assemble().unwrap();

        assert_eq!(traj.len(), 6);
        assert!(traj.gap_count >= 1);
        assert_eq!(traj.gap_count, traj.points.iter().filter(|p| p.interpolated).count());
        assert!(traj.has_gaps);

        let mid = traj.points[2];
        assert!(mid.interpolated);
        assert_abs_diff_eq!(mid.x, 0.14, epsilon = 1e-5);
        assert_abs_diff_eq!(mid.y, 0.73, epsilon = 1e-5);
        assert_abs_diff_eq!(mid.confidence, 0.4, epsilon = 1e-5);
    }

    #[test]
    fn too_few_points_is_none() {
        let mut asm = assembler();
        for i in 0..5 {
            let (x, y) = parabola(i);
            asm.push_detection(i, at(i), x, y, 0.9);
        }

        assert!(asm.assemble().is_none());
    }

    #[test]
    fn long_gaps_are_not_filled() {
        let mut asm = assembler();
        for i in 0..3 {
            asm.push_detection(i, at(i), 0.1 * i as f32, 0.5, 0.9);
        }
        for i in 3..12 {
            asm.push_gap(i, at(i));
        }
        for i in 12..15 {
            asm.push_detection(i, at(i), 0.05 * i as f32, 0.5, 0.9);
        }

        let traj = asm.assemble().unwrap();
        assert_eq!(traj.len(), 6);
        assert!(!traj.has_gaps);
    }

    #[test]
    fn apex_is_min_y_of_parabola() {
        let mut asm = assembler();
        for i in 0..11 {
            let (x, y) = parabola(i);
            asm.push_detection(i, at(i), x, y, 0.9);
        }

        let traj = asm.assemble().unwrap();
        let min_idx = traj
            .points
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.y.total_cmp(&b.1.y))
            .unwrap()
            .0;

        assert_eq!(traj.apex_index, min_idx);
        assert_eq!(traj.apex_index, 5);
        assert!(traj.physics_plausibility > 0.9);
        assert!(traj.smoothness > 0.5);
        assert!(traj.launch_angle > 0.0);
        assert_abs_diff_eq!(traj.flight_duration, 10.0 / 30.0, epsilon = 1e-5);
    }

    #[test]
    fn pixel_inputs_are_normalized() {
        let mut asm = assembler();
        for i in 0..6 {
            asm.push_detection(i, at(i), 320.0 + i as f32 * 10.0, 180.0, 0.9);
        }

        let traj = asm.assemble().unwrap();
        assert_abs_diff_eq!(traj.points[0].x, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(traj.points[0].y, 0.5, epsilon = 1e-6);
        assert!(traj.points.iter().all(|p| (0.0..=1.0).contains(&p.x)));
    }

    #[test]
    fn pixel_points_near_the_top_edge_are_rescaled() {
        let (x, y) = normalize(303.0, 0.8, 640, 360);
        assert_abs_diff_eq!(x, 303.0 / 640.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.8 / 360.0, epsilon = 1e-6);

        let (x, y) = normalize(0.5, 0.25, 640, 360);
        assert_abs_diff_eq!(x, 0.5);
        assert_abs_diff_eq!(y, 0.25);
    }

    #[test]
    fn events_keep_their_own_timestamps() {
        let mut asm = assembler();
        asm.anchor(1.0, 320.0, 300.0);

        // 60 fps source: every frame is a distinct point
        for i in 1..=8 {
            let t = 1.0 + i as f32 / 60.0;
            if i == 4 {
                asm.push_gap(100 + i, t);
            } else {
                asm.push_detection(100 + i, t, 320.0 + 4.0 * i as f32, 300.0 - 6.0 * i as f32, 0.9);
            }
        }

        assert_eq!(asm.detections(), 8);
        assert_eq!(asm.gaps(), 1);

        let traj = asm.assemble().unwrap();
        assert_eq!(traj.len(), 9);
        assert_abs_diff_eq!(traj.points[0].timestamp, 1.0);
        assert_abs_diff_eq!(traj.points[0].confidence, 1.0);
        assert_abs_diff_eq!(traj.points[4].timestamp, 1.0 + 4.0 / 60.0, epsilon = 1e-6);
        assert!(traj.points[4].interpolated);
        assert_abs_diff_eq!(traj.points[4].x, 336.0 / 640.0, epsilon = 1e-5);
        assert_abs_diff_eq!(traj.flight_duration, 8.0 / 60.0, epsilon = 1e-5);
    }

    #[test]
    fn events_before_the_anchor_are_dropped() {
        let mut asm = assembler();
        asm.anchor(1.0, 0.5, 0.9);
        asm.push_detection(10, 0.9, 0.5, 0.8, 0.9);
        asm.push_gap(11, 1.0);

        assert_eq!(asm.detections(), 1);
        assert_eq!(asm.gaps(), 0);
    }

    #[test]
    fn out_of_order_events_are_dropped() {
        let mut asm = assembler();
        asm.push_detection(3, at(3), 0.1, 0.5, 0.9);
        asm.push_detection(2, at(2), 0.2, 0.5, 0.9);
        asm.push_gap(3, at(3));

        assert_eq!(asm.detections(), 1);
        assert_eq!(asm.gaps(), 0);
    }

    #[test]
    fn zigzag_is_less_plausible_than_parabola() {
        let smooth: Vec<TrajectoryPoint> = (0..11)
            .map(|i| {
                let (x, y) = parabola(i);
                TrajectoryPoint::new(i as f32 / 30.0, x, y, 0.9)
            })
            .collect();
        let zigzag: Vec<TrajectoryPoint> = (0..11)
            .map(|i| {
                let x = if i % 2 == 0 { 0.2 } else { 0.6 };
                TrajectoryPoint::new(i as f32 / 30.0, x, 0.2 + 0.6 * (i % 3) as f32 / 2.0, 0.9)
            })
            .collect();

        let a = Trajectory::from_points(smooth, 640, 360, TrajectoryMethod::Tracked, None);
        let b = Trajectory::from_points(zigzag, 640, 360, TrajectoryMethod::Tracked, None);

        assert!(a.smoothness > b.smoothness);
        assert!(a.physics_plausibility > b.physics_plausibility);
    }

    #[test]
    fn manual_override_replaces_points() {
        let mut asm = assembler();
        for i in 0..6 {
            let (x, y) = parabola(i);
            asm.push_detection(i, at(i), x, y, 0.9);
        }
        let traj = asm.assemble().unwrap();

        let edited = traj
            .with_manual_override(vec![
                TrajectoryPoint::new(0.0, 64.0, 324.0, 1.0),
                TrajectoryPoint::new(1.0, 320.0, 36.0, 1.0),
                TrajectoryPoint::new(2.0, 576.0, 180.0, 1.0),
            ])
            .unwrap();

        assert!(edited.manual_override);
        assert_eq!(edited.method, TrajectoryMethod::Manual);
        assert_eq!(edited.apex_index, 1);
        assert_abs_diff_eq!(edited.points[0].x, 0.1, epsilon = 1e-6);
        assert!(traj.with_manual_override(vec![]).is_err());
    }
}
