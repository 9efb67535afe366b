use std::collections::VecDeque;

use crate::color::{self, ColorTemplate, Hsv};
use crate::detection::{CandidateSource, DetectionCandidate};
use crate::flow::MotionEstimate;
use crate::math;
use crate::matcher::MultiScaleMatcher;
use crate::region::Region;

use image::{GrayImage, RgbImage};
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::trace;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CandidateConfig {
    pub blob_min_color: f32,
    pub blob_min_value: f32,
    pub blob_min_area: usize,
    pub blob_max_area: usize,
    pub max_blobs: usize,
    pub color_blend: f32,
    pub diff_scale: f32,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            blob_min_color: 0.5,
            blob_min_value: 180.0,
            blob_min_area: 3,
            blob_max_area: 2500,
            max_blobs: 8,
            color_blend: 0.3,
            diff_scale: 40.0,
        }
    }
}

pub struct FrameView<'a> {
    pub image: &'a RgbImage,
    pub gray: &'a GrayImage,
    pub previous: Option<&'a GrayImage>,
    pub elapsed: f32,
}

#[derive(Default, Clone, Copy)]
pub struct Cues<'a> {
    pub matcher: Option<&'a MultiScaleMatcher>,
    pub template: Option<&'a ColorTemplate>,
    pub motion: Option<MotionEstimate>,
    pub expected_radius: Option<f32>,
    pub expected_scale: Option<f32>,
}

pub struct CandidateGenerator {
    config: CandidateConfig,
}

impl CandidateGenerator {
    pub fn new(config: CandidateConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, frame: &FrameView<'_>, region: &Region, cues: &Cues<'_>) -> Vec<DetectionCandidate> {
        let (fw, fh) = frame.image.dimensions();
        let region = match region.clip(fw, fh) {
            Some(r) => r,
            None => return Vec::new(),
        };

        let fallback_radius = cues.expected_radius.unwrap_or(4.0).max(1.0);
        let mut out = Vec::new();

        if let Some(matcher) = cues.matcher.filter(|m| m.is_prepared()) {
            for m in matcher.search(frame.gray, Some(region), cues.expected_scale) {
                out.push(raw_candidate(m.x, m.y, m.radius, m.score, CandidateSource::Template));
            }
        }

        if let Some(motion) = cues.motion {
            if region.contains(na::Point2::new(motion.x, motion.y)) {
                let mut c = raw_candidate(motion.x, motion.y, fallback_radius, 0.5, CandidateSource::Motion);
                c.motion_score = motion.consistency.clamp(0.0, 1.0);
                out.push(c);
            }
        }

        out.extend(self.blobs(frame, &region, cues.template));

        for c in out.iter_mut() {
            self.enrich(c, frame, cues);
        }

        trace!(count = out.len(), "candidates proposed");

        out
    }

    fn enrich(&self, c: &mut DetectionCandidate, frame: &FrameView<'_>, cues: &Cues<'_>) {
        let center = c.position();

        c.brightness = color::mean_brightness(frame.image, center, c.radius);
        c.color_score = cues
            .template
            .map(|t| t.region_score(frame.image, center, c.radius, frame.elapsed));

        c.appearance_score = match (c.source, c.color_score) {
            (CandidateSource::Template, Some(color)) => {
                math::lerp(c.appearance_score, color, self.config.color_blend)
            }
            (CandidateSource::Template, None) => c.appearance_score,
            (_, Some(color)) => color,
            (_, None) => c.appearance_score,
        }
        .clamp(0.0, 1.0);

        if c.source != CandidateSource::Motion {
            let flow = cues.motion.map(|m| {
                let d = na::distance(&center, &na::Point2::new(m.x, m.y));
                m.consistency.clamp(0.0, 1.0) * math::gauss(d, (2.0 * c.radius).max(4.0))
            });
            let diff = frame.previous.map(|prev| {
                (frame_difference(frame.gray, prev, center, c.radius) / self.config.diff_scale).clamp(0.0, 1.0)
            });

            c.motion_score = match (flow, diff) {
                (None, None) => 0.5,
                (a, b) => a.unwrap_or(0.0).max(b.unwrap_or(0.0)),
            };
        }
    }

    fn blobs(&self, frame: &FrameView<'_>, region: &Region, template: Option<&ColorTemplate>) -> Vec<DetectionCandidate> {
        let (x0, y0, x1, y1) = region.pixel_bounds();
        let (fw, fh) = frame.image.dimensions();
        let (x1, y1) = (x1.min(fw), y1.min(fh));
        if x1 <= x0 || y1 <= y0 {
            return Vec::new();
        }

        let (w, h) = ((x1 - x0) as usize, (y1 - y0) as usize);
        let mut mask = vec![false; w * h];

        for y in 0..h {
            for x in 0..w {
                let p = frame.image.get_pixel(x0 + x as u32, y0 + y as u32).0;
                let hsv = Hsv::from_rgb(p[0], p[1], p[2]);

                mask[y * w + x] = match template {
                    Some(t) => t.score(hsv, frame.elapsed) >= self.config.blob_min_color,
                    None => hsv.v >= self.config.blob_min_value,
                };
            }
        }

        let mut blobs = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..mask.len() {
            if !mask[start] {
                continue;
            }

            mask[start] = false;
            queue.push_back(start);

            let (mut area, mut sx, mut sy) = (0usize, 0.0f32, 0.0f32);

            while let Some(i) = queue.pop_front() {
                let (x, y) = (i % w, i / w);
                area += 1;
                sx += x as f32;
                sy += y as f32;

                let neighbours = [
                    (x > 0).then(|| i - 1),
                    (x + 1 < w).then(|| i + 1),
                    (y > 0).then(|| i - w),
                    (y + 1 < h).then(|| i + w),
                ];

                for j in neighbours.into_iter().flatten() {
                    if mask[j] {
                        mask[j] = false;
                        queue.push_back(j);
                    }
                }
            }

            if area < self.config.blob_min_area || area > self.config.blob_max_area {
                continue;
            }

            let cx = x0 as f32 + sx / area as f32 + 0.5;
            let cy = y0 as f32 + sy / area as f32 + 0.5;
            let radius = (area as f32 / std::f32::consts::PI).sqrt().max(1.0);
            let fill = (area as f32 / (w * h) as f32).min(1.0);

            blobs.push((area, raw_candidate(cx, cy, radius, 0.5 * (1.0 - fill), CandidateSource::Blob)));
        }

        blobs.sort_by(|a, b| b.0.cmp(&a.0));
        blobs.truncate(self.config.max_blobs);

        blobs.into_iter().map(|(_, c)| c).collect()
    }
}

fn raw_candidate(x: f32, y: f32, radius: f32, appearance: f32, source: CandidateSource) -> DetectionCandidate {
    DetectionCandidate {
        x,
        y,
        radius,
        brightness: 0.0,
        appearance_score: appearance,
        motion_score: 0.5,
        color_score: None,
        source,
    }
}

pub fn frame_difference(current: &GrayImage, previous: &GrayImage, center: na::Point2<f32>, radius: f32) -> f32 {
    if current.dimensions() != previous.dimensions() {
        return 0.0;
    }

    let (w, h) = current.dimensions();
    let radius = radius.max(1.0);
    let r2 = radius * radius;

    let x0 = (center.x - radius).floor().max(0.0) as u32;
    let y0 = (center.y - radius).floor().max(0.0) as u32;
    let x1 = ((center.x + radius).ceil().max(0.0) as u32).min(w);
    let y1 = ((center.y + radius).ceil().max(0.0) as u32).min(h);

    let (mut sum, mut n) = (0.0f32, 0usize);

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;

            if dx * dx + dy * dy <= r2 {
                let a = current.get_pixel(x, y).0[0] as f32;
                let b = previous.get_pixel(x, y).0[0] as f32;
                sum += (a - b).abs();
                n += 1;
            }
        }
    }

    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, Rgb};

    fn frame_with_ball(cx: i32, cy: i32) -> RgbImage {
        let mut img = RgbImage::from_pixel(80, 60, Rgb([30, 90, 30]));
        for y in 0..60 {
            for x in 0..80 {
                if (x - cx).pow(2) + (y - cy).pow(2) <= 9 {
                    img.put_pixel(x as u32, y as u32, Rgb([250, 250, 250]));
                }
            }
        }
        img
    }

    #[test]
    fn finds_bright_blob_without_template() {
        let img = frame_with_ball(40, 30);
        let gray = imageops::grayscale(&img);
        let view = FrameView {
            image: &img,
            gray: &gray,
            previous: None,
            elapsed: 0.0,
        };

        let gen = CandidateGenerator::new(CandidateConfig::default());
        let cands = gen.generate(&view, &Region::frame(80, 60), &Cues::default());

        assert_eq!(cands.len(), 1);
        let c = cands[0];
        assert_eq!(c.source, CandidateSource::Blob);
        assert!((c.x - 40.5).abs() < 1.0 && (c.y - 30.5).abs() < 1.0);
        assert!(c.brightness > 200.0);
        assert!(c.color_score.is_none());
    }

    #[test]
    fn region_limits_search() {
        let img = frame_with_ball(40, 30);
        let gray = imageops::grayscale(&img);
        let view = FrameView {
            image: &img,
            gray: &gray,
            previous: None,
            elapsed: 0.0,
        };

        let gen = CandidateGenerator::new(CandidateConfig::default());

        assert!(gen
            .generate(&view, &Region::new(0.0, 0.0, 20.0, 20.0), &Cues::default())
            .is_empty());
        assert!(gen
            .generate(&view, &Region::new(100.0, 100.0, 20.0, 20.0), &Cues::default())
            .is_empty());
    }

    #[test]
    fn template_colors_blobs() {
        let still = frame_with_ball(20, 30);
        let template = ColorTemplate::extract(&still, na::Point2::new(20.5, 30.5), 3.0).unwrap();

        let img = frame_with_ball(40, 30);
        let gray = imageops::grayscale(&img);
        let prev = imageops::grayscale(&still);
        let view = FrameView {
            image: &img,
            gray: &gray,
            previous: Some(&prev),
            elapsed: 0.1,
        };

        let cues = Cues {
            template: Some(&template),
            ..Default::default()
        };
        let cands = CandidateGenerator::new(CandidateConfig::default()).generate(&view, &Region::frame(80, 60), &cues);

        let ball = cands
            .iter()
            .find(|c| (c.x - 40.5).abs() < 1.5)
            .unwrap();
        assert!(ball.color_score.unwrap() > 0.5);
        assert!(ball.motion_score > 0.5);
    }

    #[test]
    fn motion_estimate_becomes_candidate() {
        let img = frame_with_ball(40, 30);
        let gray = imageops::grayscale(&img);
        let view = FrameView {
            image: &img,
            gray: &gray,
            previous: None,
            elapsed: 0.0,
        };

        let cues = Cues {
            motion: Some(MotionEstimate {
                x: 40.5,
                y: 30.5,
                dx: 2.0,
                dy: -1.0,
                consistency: 0.9,
                tracked: 5,
            }),
            expected_radius: Some(3.0),
            ..Default::default()
        };

        let cands = CandidateGenerator::new(CandidateConfig::default()).generate(&view, &Region::frame(80, 60), &cues);

        let motion = cands
            .iter()
            .find(|c| c.source == CandidateSource::Motion)
            .unwrap();
        assert!((motion.motion_score - 0.9).abs() < 1e-6);

        let blob = cands.iter().find(|c| c.source == CandidateSource::Blob).unwrap();
        assert!(blob.motion_score > 0.8);
    }

    #[test]
    fn difference_of_identical_frames_is_zero() {
        let gray = imageops::grayscale(&frame_with_ball(40, 30));

        assert_eq!(frame_difference(&gray, &gray, na::Point2::new(40.0, 30.0), 4.0), 0.0);
    }
}
