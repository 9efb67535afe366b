use crate::math;

use image::GrayImage;
use nalgebra as na;
use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FlowConfig {
    pub max_features: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub window: usize,
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    pub min_tracked: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_features: 20,
            quality_level: 0.05,
            min_distance: 2.0,
            window: 3,
            pyramid_levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            min_tracked: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MotionEstimate {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub consistency: f32,
    pub tracked: usize,
}

struct Pyramid {
    levels: Vec<Array2<f32>>,
}

impl Pyramid {
    fn build(img: &GrayImage, num_levels: usize) -> Self {
        let (w, h) = img.dimensions();
        let base = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
            img.get_pixel(x as u32, y as u32).0[0] as f32
        });

        let mut levels = vec![base];

        while levels.len() < num_levels.max(1) {
            let prev = &levels[levels.len() - 1];
            let (ph, pw) = prev.dim();

            if ph < 16 || pw < 16 {
                break;
            }

            let (nh, nw) = (ph / 2, pw / 2);
            let next = Array2::from_shape_fn((nh, nw), |(y, x)| {
                let (sy, sx) = (y * 2, x * 2);
                0.25 * (prev[[sy, sx]]
                    + prev[[sy, sx + 1]]
                    + prev[[sy + 1, sx]]
                    + prev[[sy + 1, sx + 1]])
            });

            levels.push(next);
        }

        Self { levels }
    }
}

fn sample(img: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (h, w) = img.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = img[[y0, x0]] * (1.0 - fx) + img[[y0, x1]] * fx;
    let bottom = img[[y1, x0]] * (1.0 - fx) + img[[y1, x1]] * fx;

    top * (1.0 - fy) + bottom * fy
}

pub struct OpticalFlowTracker {
    config: FlowConfig,
    prev: Option<Pyramid>,
    points: Vec<na::Point2<f32>>,
    center: na::Point2<f32>,
    radius: f32,
}

impl OpticalFlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            prev: None,
            points: Vec::new(),
            center: na::Point2::origin(),
            radius: 0.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.prev.is_some() && !self.points.is_empty()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn reset(&mut self) {
        self.prev = None;
        self.points.clear();
        self.center = na::Point2::origin();
        self.radius = 0.0;
    }

    pub fn initialize(&mut self, frame: &GrayImage, center: na::Point2<f32>, radius: f32) -> bool {
        self.reset();

        let pyramid = Pyramid::build(frame, self.config.pyramid_levels);
        let points = self.seed_features(&pyramid.levels[0], center, radius);

        if points.is_empty() {
            debug!(x = center.x, y = center.y, "no trackable features around ball");
            return false;
        }

        self.points = points;
        self.prev = Some(pyramid);
        self.center = center;
        self.radius = radius;

        true
    }

    fn seed_features(
        &self,
        img: &Array2<f32>,
        center: na::Point2<f32>,
        radius: f32,
    ) -> Vec<na::Point2<f32>> {
        let (h, w) = img.dim();
        let half = self.config.window as isize;
        let reach = (radius * 1.5).max(2.0);

        let lo_x = ((center.x - reach).floor() as isize).max(half + 1);
        let hi_x = ((center.x + reach).ceil() as isize).min(w as isize - half - 2);
        let lo_y = ((center.y - reach).floor() as isize).max(half + 1);
        let hi_y = ((center.y + reach).ceil() as isize).min(h as isize - half - 2);

        let mut responses = Vec::new();

        for cy in lo_y..=hi_y {
            for cx in lo_x..=hi_x {
                let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);

                for py in cy - half..=cy + half {
                    for px in cx - half..=cx + half {
                        let (ux, uy) = (px as usize, py as usize);
                        let gx = 0.5 * (img[[uy, ux + 1]] - img[[uy, ux - 1]]);
                        let gy = 0.5 * (img[[uy + 1, ux]] - img[[uy - 1, ux]]);

                        gxx += gx * gx;
                        gxy += gx * gy;
                        gyy += gy * gy;
                    }
                }

                let tr = gxx + gyy;
                let det = gxx * gyy - gxy * gxy;
                let min_eig = 0.5 * (tr - (tr * tr - 4.0 * det).max(0.0).sqrt());

                if min_eig > 1e-3 {
                    responses.push((na::Point2::new(cx as f32, cy as f32), min_eig));
                }
            }
        }

        let best = responses.iter().map(|r| r.1).fold(0.0f32, f32::max);
        if best <= 0.0 {
            return Vec::new();
        }

        responses.retain(|r| r.1 >= best * self.config.quality_level);
        responses.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));

        let min_d2 = self.config.min_distance * self.config.min_distance;
        let mut out: Vec<na::Point2<f32>> = Vec::with_capacity(self.config.max_features);

        for (p, _) in responses {
            if out.len() >= self.config.max_features {
                break;
            }

            if out.iter().all(|q| na::distance_squared(q, &p) >= min_d2) {
                out.push(p);
            }
        }

        out
    }

    /// Propagates features into `next` and returns the ball's new position.
    /// `None` once too few features survive; the tracker is then reset.
    pub fn track(&mut self, next: &GrayImage) -> Option<MotionEstimate> {
        let prev = self.prev.take()?;
        let curr = Pyramid::build(next, self.config.pyramid_levels);

        if prev.levels[0].dim() != curr.levels[0].dim() {
            self.reset();
            return None;
        }

        let num_levels = prev.levels.len().min(curr.levels.len());
        let (h, w) = curr.levels[0].dim();

        let mut moved = Vec::with_capacity(self.points.len());
        let mut dxs = Vec::with_capacity(self.points.len());
        let mut dys = Vec::with_capacity(self.points.len());

        for p in &self.points {
            if let Some((dx, dy)) = self.track_point(&prev, &curr, *p, num_levels) {
                let q = na::Point2::new(p.x + dx, p.y + dy);

                if q.x >= 0.0 && q.y >= 0.0 && q.x < w as f32 && q.y < h as f32 {
                    moved.push(q);
                    dxs.push(dx);
                    dys.push(dy);
                }
            }
        }

        if moved.len() < self.config.min_tracked.max(1) {
            debug!(tracked = moved.len(), "optical flow lost the ball");
            self.reset();
            return None;
        }

        let tracked = moved.len();
        let mdx = math::median(&mut dxs.clone())?;
        let mdy = math::median(&mut dys.clone())?;

        let mut spread: Vec<f32> = dxs
            .iter()
            .zip(dys.iter())
            .map(|(dx, dy)| ((dx - mdx).powi(2) + (dy - mdy).powi(2)).sqrt())
            .collect();
        let mad = math::median(&mut spread).unwrap_or(0.0);

        let consistency = math::gauss(mad, (self.radius * 0.5).max(1.0));

        self.center = na::Point2::new(self.center.x + mdx, self.center.y + mdy);
        self.points = moved;
        self.prev = Some(curr);

        Some(MotionEstimate {
            x: self.center.x,
            y: self.center.y,
            dx: mdx,
            dy: mdy,
            consistency,
            tracked,
        })
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        p: na::Point2<f32>,
        num_levels: usize,
    ) -> Option<(f32, f32)> {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let (fx, fy) = (p.x * scale, p.y * scale);

            let (ndx, ndy) = self.lk_level(&prev.levels[level], &curr.levels[level], fx, fy, dx, dy)?;
            dx = ndx;
            dy = ndy;

            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        Some((dx, dy))
    }

    fn lk_level(
        &self,
        prev: &Array2<f32>,
        curr: &Array2<f32>,
        fx: f32,
        fy: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> Option<(f32, f32)> {
        let half = self.config.window as isize;

        for _ in 0..self.config.max_iterations {
            let (mut h00, mut h01, mut h11) = (0.0f32, 0.0f32, 0.0f32);
            let (mut b0, mut b1) = (0.0f32, 0.0f32);

            for py in -half..=half {
                for px in -half..=half {
                    let (ox, oy) = (px as f32, py as f32);

                    let t = sample(prev, fx + ox, fy + oy);
                    let (wx, wy) = (fx + dx + ox, fy + dy + oy);
                    let e = t - sample(curr, wx, wy);

                    let gx = 0.5 * (sample(curr, wx + 1.0, wy) - sample(curr, wx - 1.0, wy));
                    let gy = 0.5 * (sample(curr, wx, wy + 1.0) - sample(curr, wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return None;
            }

            let inv = 1.0 / det;
            let ddx = inv * (h11 * b0 - h01 * b1);
            let ddy = inv * (h00 * b1 - h01 * b0);

            dx += ddx;
            dy += ddy;

            if ddx * ddx + ddy * ddy < self.config.epsilon * self.config.epsilon {
                break;
            }
        }

        Some((dx, dy))
    }
}
