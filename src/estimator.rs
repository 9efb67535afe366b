use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Apparent gravity in pixels per second squared.
    pub gravity: f32,
    pub fps: f32,
    pub process_noise: f32,
    pub measurement_noise: f32,
    pub initial_position_var: f32,
    pub initial_velocity_var: f32,
    pub gate_sigmas: f32,
    pub min_gate: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            gravity: 300.0,
            fps: 30.0,
            process_noise: 1.0,
            measurement_noise: 4.0,
            initial_position_var: 25.0,
            initial_velocity_var: 400.0,
            gate_sigmas: 3.0,
            min_gate: 25.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub uncertainty: f32,
}

// state is [x, y, vx, vy] in pixels per frame, y grows downward
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    config: EstimatorConfig,
    x: na::Vector4<f32>,
    p: na::Matrix4<f32>,
    f: na::Matrix4<f32>,
    q: na::Matrix4<f32>,
    h: na::Matrix2x4<f32>,
    r: na::Matrix2<f32>,
    gravity_per_frame: f32,
    initialized: bool,
    /// a predict() has run since the last correction
    predicted: bool,
}

impl MotionEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let fps = if config.fps > 0.0 { config.fps } else { 30.0 };
        let gravity_per_frame = config.gravity / (fps * fps);

        #[rustfmt::skip]
        let f = na::Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        #[rustfmt::skip]
        let h = na::Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );

        let qn = config.process_noise;
        let q = na::Matrix4::from_diagonal(&na::Vector4::new(qn * 0.25, qn * 0.25, qn, qn));
        let r = na::Matrix2::identity() * config.measurement_noise;

        Self {
            config,
            x: na::Vector4::zeros(),
            p: na::Matrix4::identity(),
            f,
            q,
            h,
            r,
            gravity_per_frame,
            initialized: false,
            predicted: false,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn initialize(&mut self, x: f32, y: f32, velocity: Option<(f32, f32)>) {
        let (vx, vy) = velocity.unwrap_or((0.0, 0.0));

        self.x = na::Vector4::new(x, y, vx, vy);
        self.p = na::Matrix4::from_diagonal(&na::Vector4::new(
            self.config.initial_position_var,
            self.config.initial_position_var,
            self.config.initial_velocity_var,
            self.config.initial_velocity_var,
        ));
        self.initialized = true;
        self.predicted = false;
    }

    pub fn state(&self) -> MotionState {
        MotionState {
            x: self.x[0],
            y: self.x[1],
            vx: self.x[2],
            vy: self.x[3],
            uncertainty: self.uncertainty(),
        }
    }

    #[inline]
    pub fn position(&self) -> na::Point2<f32> {
        na::Point2::new(self.x[0], self.x[1])
    }

    #[inline]
    pub fn velocity(&self) -> na::Vector2<f32> {
        na::Vector2::new(self.x[2], self.x[3])
    }

    pub fn uncertainty(&self) -> f32 {
        let s = self.innovation_cov();
        ((s[(0, 0)] + s[(1, 1)]) * 0.5).max(0.0).sqrt()
    }

    #[inline]
    fn innovation_cov(&self) -> na::Matrix2<f32> {
        self.h * self.p * self.h.transpose() + self.r
    }

    pub fn predict(&mut self) -> MotionState {
        let g = self.gravity_per_frame;

        self.x = self.f * self.x + na::Vector4::new(0.0, 0.5 * g, 0.0, g);
        self.p = self.f * self.p * self.f.transpose() + self.q;
        self.predicted = true;

        self.state()
    }

    pub fn update(&mut self, measured_x: f32, measured_y: f32) -> MotionState {
        if !self.initialized {
            self.initialize(measured_x, measured_y, None);
            return self.state();
        }

        if !self.predicted {
            self.predict();
        }

        let z = na::Vector2::new(measured_x, measured_y);
        let y = z - self.h * self.x;
        let s = self.innovation_cov();

        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                warn!("innovation covariance is singular, skipping correction");
                self.predicted = false;
                return self.state();
            }
        };

        let k = self.p * self.h.transpose() * s_inv;

        self.x += k * y;
        self.p = (na::Matrix4::identity() - k * self.h) * self.p;
        self.predicted = false;

        self.state()
    }

    pub fn update_no_measurement(&mut self) -> MotionState {
        if !self.predicted {
            self.predict();
        }

        self.predicted = false;
        self.state()
    }

    pub fn gate_radius(&self) -> f32 {
        let speed = self.velocity().norm();
        (self.config.gate_sigmas * self.uncertainty() + speed * 0.5).max(self.config.min_gate)
    }

    pub fn is_measurement_plausible(&self, x: f32, y: f32) -> bool {
        self.is_within_gate(x, y, 1.0)
    }

    /// Gate test with the radius widened by `scale`, for searches that
    /// trade reach for stricter validation.
    pub fn is_within_gate(&self, x: f32, y: f32, scale: f32) -> bool {
        if !self.initialized {
            return true;
        }

        let d = na::distance(&self.position(), &na::Point2::new(x, y));
        d <= self.gate_radius() * scale.max(1.0)
    }
}
