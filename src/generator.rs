use crate::error::Error;
use crate::events::{Notifier, WarningCode};
use crate::math;
use crate::shot::{ShotHeight, ShotShape, StartingLine};
use crate::trajectory::{self, Trajectory, TrajectoryMethod, TrajectoryPoint};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sample_rate: f32,
    pub apex_timing: f32,
    pub physics_confidence: f32,
    pub apex_confidence: f32,
    pub curve_amplitude: f32,
    pub start_line_amplitude: f32,
    pub default_landing_rise: f32,
    pub min_apex_y: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30.0,
            apex_timing: 0.45,
            physics_confidence: 0.7,
            apex_confidence: 0.9,
            curve_amplitude: 0.08,
            start_line_amplitude: 0.04,
            default_landing_rise: 0.1,
            min_apex_y: 0.02,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GenerationRequest {
    pub origin: na::Point2<f32>,
    pub landing: Option<na::Point2<f32>>,
    pub apex: Option<na::Point2<f32>>,
    pub shape: ShotShape,
    pub height: ShotHeight,
    pub starting_line: StartingLine,
    pub frame_width: u32,
    pub frame_height: u32,
    pub start_time: f32,
    pub flight_duration: Option<f32>,
    pub apex_timing: Option<f32>,
    pub early_detection_failed: bool,
}

impl GenerationRequest {
    pub fn new(origin: na::Point2<f32>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            origin,
            landing: None,
            apex: None,
            shape: ShotShape::default(),
            height: ShotHeight::default(),
            starting_line: StartingLine::default(),
            frame_width,
            frame_height,
            start_time: 0.0,
            flight_duration: None,
            apex_timing: None,
            early_detection_failed: false,
        }
    }

    fn normalized(&self, p: na::Point2<f32>) -> na::Point2<f32> {
        let (x, y) = trajectory::normalize(p.x, p.y, self.frame_width, self.frame_height);
        na::Point2::new(x, y)
    }
}

pub struct TrajectoryGenerator {
    config: GeneratorConfig,
}

impl TrajectoryGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn default_landing(&self, req: &GenerationRequest, origin: na::Point2<f32>) -> na::Point2<f32> {
        let dx = 2.0 * self.config.curve_amplitude * req.shape.curve_factor()
            + self.config.start_line_amplitude * req.starting_line.direction();

        na::Point2::new(
            (origin.x + dx).clamp(0.0, 1.0),
            (origin.y - self.config.default_landing_rise).clamp(0.0, 1.0),
        )
    }

    pub fn generate(&self, req: &GenerationRequest, notifier: &Notifier<'_>) -> Result<Trajectory, Error> {
        let duration = req.flight_duration.unwrap_or_else(|| req.height.flight_duration());
        if !(duration > 0.0) {
            return Err(Error::InvalidInput(format!("flight duration {duration} must be positive")));
        }
        if req.frame_width == 0 || req.frame_height == 0 {
            return Err(Error::InvalidInput("frame dimensions must be non-zero".into()));
        }

        if req.early_detection_failed {
            notifier.warning(
                WarningCode::EarlyBallDetectionFailed,
                "ball was not found near the origin, generated path starts at the marked point",
            );
        }

        notifier.progress(0.0, "generating trajectory");

        let origin = req.normalized(req.origin);
        let landing = req
            .landing
            .map(|p| req.normalized(p))
            .unwrap_or_else(|| self.default_landing(req, origin));

        let constrained = req.apex.is_some();
        let apex = match req.apex {
            Some(p) => req.normalized(p),
            None => na::Point2::new(
                (origin.x + landing.x) * 0.5,
                (origin.y.min(landing.y) - req.height.apex_rise()).max(self.config.min_apex_y),
            ),
        };

        let apex_t = req
            .apex_timing
            .unwrap_or(self.config.apex_timing)
            .clamp(0.1, 0.9);

        let samples = ((duration * self.config.sample_rate).ceil() as usize).max(2);
        let mut ts: Vec<f32> = (0..=samples).map(|i| i as f32 / samples as f32).collect();
        if constrained {
            ts.push(apex_t);
            ts.sort_by(|a, b| a.total_cmp(b));
            ts.dedup_by(|b, a| (*b - *a).abs() < 1e-6);
        }

        notifier.progress(30.0, "sampling flight curve");

        let confidence = if constrained {
            self.config.apex_confidence
        } else {
            self.config.physics_confidence
        };

        let mut points: Vec<TrajectoryPoint> = ts
            .iter()
            .map(|&t| {
                let mut p = flight_curve(origin, apex, landing, apex_t, t);

                // a marked apex pins the path, shape offsets would pull it off
                if !constrained {
                    let bulge = (std::f32::consts::PI * t).sin();
                    p.x += self.config.curve_amplitude * req.shape.curve_factor() * bulge
                        + self.config.start_line_amplitude * req.starting_line.direction() * bulge * (1.0 - t);
                }

                TrajectoryPoint::new(req.start_time + t * duration, p.x, p.y, confidence)
            })
            .collect();

        if let Some(first) = points.first_mut() {
            first.x = origin.x;
            first.y = origin.y;
        }
        if let Some(last) = points.last_mut() {
            last.x = landing.x;
            last.y = landing.y;
        }

        notifier.progress(80.0, "computing trajectory landmarks");

        let method = if constrained {
            TrajectoryMethod::ApexConstrained
        } else {
            TrajectoryMethod::Physics
        };

        let traj = Trajectory::from_points(points, req.frame_width, req.frame_height, method, Some(confidence));

        debug!(
            points = traj.len(),
            duration,
            method = method.as_str(),
            "generated trajectory"
        );
        notifier.progress(100.0, "trajectory generated");

        Ok(traj)
    }
}

/// Cubic Bezier climb to the apex followed by a cubic Bezier descent.
/// Control points keep `y` monotone on each side so the apex stays the
/// highest point.
fn flight_curve(
    origin: na::Point2<f32>,
    apex: na::Point2<f32>,
    landing: na::Point2<f32>,
    apex_t: f32,
    t: f32,
) -> na::Point2<f32> {
    if t <= apex_t {
        let s = t / apex_t;
        let c1 = na::Point2::new(math::lerp(origin.x, apex.x, 0.3), math::lerp(origin.y, apex.y, 0.8));
        let c2 = na::Point2::new(math::lerp(origin.x, apex.x, 0.7), apex.y);

        math::cubic_bezier(origin, c1, c2, apex, s)
    } else {
        let s = (t - apex_t) / (1.0 - apex_t);
        let c1 = na::Point2::new(math::lerp(apex.x, landing.x, 0.3), apex.y);
        let c2 = na::Point2::new(math::lerp(apex.x, landing.x, 0.75), math::lerp(apex.y, landing.y, 0.5));

        math::cubic_bezier(apex, c1, c2, landing, s)
    }
}
