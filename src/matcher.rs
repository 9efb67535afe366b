use crate::region::Region;

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

const MIN_TEMPLATE_SIDE: u32 = 3;
const MIN_VARIANCE: f32 = 1e-3;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_scale: f32,
    pub max_scale: f32,
    pub num_scales: usize,
    pub min_correlation: f32,
    pub nms_radius: f32,
    pub scale_penalty: f32,
    pub max_matches: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.3,
            max_scale: 1.5,
            num_scales: 13,
            min_correlation: 0.5,
            nms_radius: 10.0,
            scale_penalty: 0.3,
            max_matches: 16,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ScaleMatch {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub score: f32,
    pub radius: f32,
}

#[derive(Debug, Clone)]
struct ScaledTemplate {
    scale: f32,
    data: Array2<f32>,
    norm: f32,
}

impl ScaledTemplate {
    fn new(scale: f32, img: &GrayImage) -> Option<Self> {
        let (w, h) = img.dimensions();
        let raw = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
            img.get_pixel(x as u32, y as u32).0[0] as f32
        });

        let mean = raw.mean()?;
        let data = raw.mapv(|v| v - mean);
        let norm = data.mapv(|v| v * v).sum().sqrt();

        if norm * norm / ((w * h) as f32) < MIN_VARIANCE {
            return None;
        }

        Some(Self { scale, data, norm })
    }

    #[inline]
    fn width(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    fn height(&self) -> usize {
        self.data.nrows()
    }
}

struct Integral {
    sum: Array2<f64>,
    sq: Array2<f64>,
}

impl Integral {
    fn new(plane: &Array2<f32>) -> Self {
        let (h, w) = plane.dim();
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sq = Array2::<f64>::zeros((h + 1, w + 1));

        for y in 0..h {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;

            for x in 0..w {
                let v = plane[[y, x]] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row_sum;
                sq[[y + 1, x + 1]] = sq[[y, x + 1]] + row_sq;
            }
        }

        Self { sum, sq }
    }

    #[inline]
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.sum[[y + h, x + w]] - self.sum[[y, x + w]] - self.sum[[y + h, x]]
            + self.sum[[y, x]];
        let q = self.sq[[y + h, x + w]] - self.sq[[y, x + w]] - self.sq[[y + h, x]]
            + self.sq[[y, x]];

        (s, q)
    }
}

pub struct MultiScaleMatcher {
    config: MatcherConfig,
    base_radius: f32,
    pyramid: Vec<ScaledTemplate>,
}

impl MultiScaleMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            base_radius: 0.0,
            pyramid: Vec::new(),
        }
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        !self.pyramid.is_empty()
    }

    pub fn scales(&self) -> impl Iterator<Item = f32> + '_ {
        self.pyramid.iter().map(|t| t.scale)
    }

    /// Radius reported for a match at scale 1. `prepare` resets it to half
    /// the template's shorter side, so call this afterwards for padded templates.
    pub fn set_base_radius(&mut self, radius: f32) {
        self.base_radius = radius;
    }

    /// Builds the scale pyramid, returns the number of usable levels.
    /// Levels that collapse below a few pixels or carry no texture are skipped.
    pub fn prepare(&mut self, template: &GrayImage) -> usize {
        self.pyramid.clear();

        let (tw, th) = template.dimensions();
        self.base_radius = tw.min(th) as f32 / 2.0;

        let n = self.config.num_scales.max(1);
        let step = if n > 1 {
            (self.config.max_scale - self.config.min_scale) / (n - 1) as f32
        } else {
            0.0
        };

        for i in 0..n {
            let scale = self.config.min_scale + step * i as f32;
            let w = (tw as f32 * scale).round() as u32;
            let h = (th as f32 * scale).round() as u32;

            if w < MIN_TEMPLATE_SIDE || h < MIN_TEMPLATE_SIDE {
                continue;
            }

            let resized = if w == tw && h == th {
                template.clone()
            } else {
                imageops::resize(template, w, h, FilterType::Triangle)
            };

            if let Some(level) = ScaledTemplate::new(scale, &resized) {
                self.pyramid.push(level);
            }
        }

        debug!(levels = self.pyramid.len(), "template pyramid prepared");

        self.pyramid.len()
    }

    pub fn search(
        &self,
        frame: &GrayImage,
        region: Option<Region>,
        expected_scale: Option<f32>,
    ) -> Vec<ScaleMatch> {
        let (fw, fh) = frame.dimensions();
        let region = match region.unwrap_or_else(|| Region::frame(fw, fh)).clip(fw, fh) {
            Some(r) => r,
            None => return Vec::new(),
        };

        let (x0, y0, x1, y1) = region.pixel_bounds();
        let (x1, y1) = (x1.min(fw), y1.min(fh));
        if x1 <= x0 || y1 <= y0 {
            return Vec::new();
        }

        let plane = Array2::from_shape_fn(((y1 - y0) as usize, (x1 - x0) as usize), |(y, x)| {
            frame.get_pixel(x0 + x as u32, y0 + y as u32).0[0] as f32
        });
        let integral = Integral::new(&plane);

        let mut matches = Vec::new();

        for level in &self.pyramid {
            for (x, y, score) in self.correlate(&plane, &integral, level) {
                let score = self.penalize(score, level.scale, expected_scale);

                if score < self.config.min_correlation {
                    continue;
                }

                matches.push(ScaleMatch {
                    x: x0 as f32 + x as f32 + level.width() as f32 / 2.0,
                    y: y0 as f32 + y as f32 + level.height() as f32 / 2.0,
                    scale: level.scale,
                    score,
                    radius: self.base_radius * level.scale,
                });
            }
        }

        let mut kept = non_maximum_suppression(matches, self.config.nms_radius);
        kept.truncate(self.config.max_matches);
        kept
    }

    fn penalize(&self, score: f32, scale: f32, expected: Option<f32>) -> f32 {
        match expected {
            Some(e) if e > 0.0 => {
                let dev = ((scale - e).abs() / e).min(1.0);
                score * (1.0 - self.config.scale_penalty * dev)
            }
            _ => score,
        }
    }

    fn correlate(
        &self,
        plane: &Array2<f32>,
        integral: &Integral,
        level: &ScaledTemplate,
    ) -> Vec<(usize, usize, f32)> {
        let (ph, pw) = plane.dim();
        let (tw, th) = (level.width(), level.height());

        if tw > pw || th > ph {
            return Vec::new();
        }

        let (ow, oh) = (pw - tw + 1, ph - th + 1);
        let n = (tw * th) as f64;
        let mut surface = Array2::<f32>::zeros((oh, ow));

        for y in 0..oh {
            for x in 0..ow {
                let (s, q) = integral.window(x, y, tw, th);
                let var = q - s * s / n;

                if var / n < MIN_VARIANCE as f64 {
                    continue;
                }

                let window = plane.slice(s![y..y + th, x..x + tw]);
                let cross: f32 = window
                    .iter()
                    .zip(level.data.iter())
                    .map(|(i, t)| i * t)
                    .sum();

                surface[[y, x]] = cross / (level.norm * (var.sqrt() as f32));
            }
        }

        let mut peaks = Vec::new();

        for y in 0..oh {
            for x in 0..ow {
                let v = surface[[y, x]];
                if v <= 0.0 {
                    continue;
                }

                let is_peak = (y.saturating_sub(1)..(y + 2).min(oh)).all(|ny| {
                    (x.saturating_sub(1)..(x + 2).min(ow)).all(|nx| surface[[ny, nx]] <= v)
                });

                if is_peak {
                    peaks.push((x, y, v.min(1.0)));
                }
            }
        }

        peaks
    }
}

pub fn non_maximum_suppression(mut matches: Vec<ScaleMatch>, radius: f32) -> Vec<ScaleMatch> {
    matches.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));

    let r2 = radius * radius;
    let mut kept: Vec<ScaleMatch> = Vec::with_capacity(matches.len());

    for m in matches {
        let suppressed = kept.iter().any(|k| {
            let (dx, dy) = (k.x - m.x, k.y - m.y);
            dx * dx + dy * dy < r2
        });

        if !suppressed {
            kept.push(m);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = (x * 37 + y * 91 + (x * y) % 23 * 7) % 251;
            Luma([v as u8])
        })
    }

    fn single_scale() -> MatcherConfig {
        MatcherConfig {
            min_scale: 1.0,
            max_scale: 1.0,
            num_scales: 1,
            ..Default::default()
        }
    }

    #[test]
    fn default_pyramid_spans_shrink_and_growth() {
        let mut m = MultiScaleMatcher::new(MatcherConfig::default());
        let n = m.prepare(&textured(20, 20));

        assert_eq!(n, 13);
        let scales: Vec<f32> = m.scales().collect();
        assert!((scales[0] - 0.3).abs() < 1e-6);
        assert!((scales[12] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn exact_sub_image_scores_high() {
        let frame = textured(80, 60);
        let template = imageops::crop_imm(&frame, 30, 20, 12, 12).to_image();

        let mut m = MultiScaleMatcher::new(single_scale());
        m.prepare(&template);

        let found = m.search(&frame, None, None);
        let best = found[0];

        assert!(best.score > 0.9);
        assert!((best.x - 36.0).abs() < 1.0);
        assert!((best.y - 26.0).abs() < 1.0);
    }

    #[test]
    fn template_larger_than_region_yields_nothing() {
        let frame = textured(80, 60);
        let mut m = MultiScaleMatcher::new(single_scale());
        m.prepare(&textured(20, 20));

        let found = m.search(&frame, Some(Region::new(10.0, 10.0, 15.0, 15.0)), None);
        assert!(found.is_empty());
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let mut m = MultiScaleMatcher::new(MatcherConfig::default());
        m.prepare(&textured(16, 16));

        let blank = GrayImage::new(64, 64);
        assert!(m
            .search(&blank, None, None)
            .iter()
            .all(|s| s.score < 0.5));

        let frame = textured(64, 64);
        assert!(m
            .search(&frame, Some(Region::new(5.0, 5.0, 0.0, 0.0)), None)
            .is_empty());
        assert!(m.search(&GrayImage::new(0, 0), None, None).is_empty());
    }

    #[test]
    fn flat_template_prepares_no_levels() {
        let mut m = MultiScaleMatcher::new(MatcherConfig::default());
        assert_eq!(m.prepare(&GrayImage::from_pixel(12, 12, Luma([200]))), 0);
        assert!(!m.is_prepared());
    }

    #[test]
    fn faint_template_still_prepares() {
        let mut patch = GrayImage::from_pixel(12, 12, Luma([200]));
        patch.put_pixel(6, 6, Luma([230]));

        let mut m = MultiScaleMatcher::new(single_scale());
        assert_eq!(m.prepare(&patch), 1);
    }

    #[test]
    fn nms_keeps_best_of_cluster() {
        let mk = |x, score| ScaleMatch {
            x,
            y: 0.0,
            scale: 1.0,
            score,
            radius: 4.0,
        };

        let kept = non_maximum_suppression(vec![mk(0.0, 0.7), mk(3.0, 0.9), mk(50.0, 0.6)], 10.0);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].x, 50.0);
    }

    #[test]
    fn expected_scale_penalizes_mismatch() {
        let m = MultiScaleMatcher::new(MatcherConfig::default());

        assert_eq!(m.penalize(1.0, 1.0, Some(1.0)), 1.0);
        assert!(m.penalize(1.0, 0.5, Some(1.0)) < 1.0);
        assert_eq!(m.penalize(0.8, 0.5, None), 0.8);
    }
}
