use crate::error::{Error, TemplateFailure};
use crate::math;

use image::RgbImage;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

// 8-bit HSV: hue in [0, 180), saturation and value in [0, 255]
const HUE_RANGE: f32 = 180.0;
const MIN_TEMPLATE_RADIUS: f32 = 2.0;
const MIN_TEMPLATE_SAMPLES: usize = 8;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorFamily {
    White,
    Orange,
    Yellow,
    Pink,
    Green,
    Blue,
    Other,
}

impl ColorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorFamily::White => "white",
            ColorFamily::Orange => "orange",
            ColorFamily::Yellow => "yellow",
            ColorFamily::Pink => "pink",
            ColorFamily::Green => "green",
            ColorFamily::Blue => "blue",
            ColorFamily::Other => "other",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    #[inline]
    pub fn new(h: f32, s: f32, v: f32) -> Self {
        Self { h, s, v }
    }

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let (r, g, b) = (r as f32, g as f32, b as f32);

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let v = max;
        let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

        let h = if delta < 1e-6 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };

        let h = if h < 0.0 { h + 360.0 } else { h };

        Self::new(h / 2.0, s, v)
    }
}

pub fn classify(h: f32, s: f32, v: f32) -> ColorFamily {
    if (s < 50.0 && v > 140.0) || (s < 60.0 && v > 70.0 && v <= 140.0) || (v > 220.0 && s < 80.0)
    {
        return ColorFamily::White;
    }

    if v < 60.0 || s < 60.0 {
        return ColorFamily::Other;
    }

    if (5.0..22.0).contains(&h) && s > 100.0 {
        ColorFamily::Orange
    } else if (22.0..38.0).contains(&h) && s > 80.0 {
        ColorFamily::Yellow
    } else if (38.0..85.0).contains(&h) {
        ColorFamily::Green
    } else if (85.0..130.0).contains(&h) {
        ColorFamily::Blue
    } else if h >= 140.0 || h < 5.0 {
        ColorFamily::Pink
    } else {
        ColorFamily::Other
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct ColorTemplate {
    pub family: ColorFamily,
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
    pub hue_std: f32,
    pub saturation_std: f32,
    pub value_std: f32,
}

impl ColorTemplate {
    pub fn from_hsv(median: Hsv, std: Hsv) -> Self {
        Self {
            family: classify(median.h, median.s, median.v),
            hue: median.h,
            saturation: median.s,
            value: median.v,
            hue_std: std.h,
            saturation_std: std.s,
            value_std: std.v,
        }
    }

    pub fn extract(
        image: &RgbImage,
        center: na::Point2<f32>,
        radius: f32,
    ) -> Result<Self, Error> {
        if !(radius >= MIN_TEMPLATE_RADIUS) {
            return Err(Error::TemplateUnavailable(TemplateFailure::RegionTooSmall));
        }

        let (w, h) = image.dimensions();
        if center.x - radius < 0.0
            || center.y - radius < 0.0
            || center.x + radius > w as f32
            || center.y + radius > h as f32
        {
            return Err(Error::TemplateUnavailable(TemplateFailure::BoundaryClipped));
        }

        let samples = disk_samples(image, center, radius * 0.7);
        if samples.len() < MIN_TEMPLATE_SAMPLES {
            return Err(Error::TemplateUnavailable(TemplateFailure::NotEnoughSamples));
        }

        let hs: Vec<f32> = samples.iter().map(|p| p.h).collect();
        let mut ss: Vec<f32> = samples.iter().map(|p| p.s).collect();
        let mut vs: Vec<f32> = samples.iter().map(|p| p.v).collect();

        let (hue, hue_std) = circular_hue(&hs);
        let std = Hsv::new(hue_std, math::std_dev(&ss), math::std_dev(&vs));
        let median = Hsv::new(
            hue,
            math::median(&mut ss).unwrap_or(0.0),
            math::median(&mut vs).unwrap_or(0.0),
        );

        Ok(Self::from_hsv(median, std))
    }

    /// How well one pixel matches this template, widening tolerance as
    /// time since the strike grows.
    pub fn score(&self, pixel: Hsv, elapsed_sec: f32) -> f32 {
        let factor = 1.0 + elapsed_sec.max(0.0) * 0.8;

        let score = if self.family == ColorFamily::White {
            self.white_score(pixel, factor)
        } else {
            self.colored_score(pixel, factor)
        };

        score.clamp(0.0, 1.0)
    }

    fn white_score(&self, pixel: Hsv, factor: f32) -> f32 {
        let sat_ceiling = (60.0 * factor).min(120.0);

        if pixel.s > sat_ceiling * 1.5 {
            return 0.0;
        }

        let value_tol = self.value_std.max(20.0) * 2.0 * factor;
        let mut score = 1.0 - (pixel.v - self.value).abs() / (value_tol * 2.0);
        score = score.max(0.0);

        if pixel.v > 200.0 {
            score += 0.2;
        }
        if pixel.v > 230.0 {
            score += 0.1;
        }

        if pixel.s > sat_ceiling {
            let excess = (pixel.s - sat_ceiling) / (sat_ceiling * 0.5);
            score *= 1.0 - excess * 0.5;
        }

        if pixel.v > 150.0 / factor.sqrt() && pixel.s < sat_ceiling {
            score = score.max(0.6);
        }

        score
    }

    fn colored_score(&self, pixel: Hsv, factor: f32) -> f32 {
        let hue_tol = (self.hue_std * 2.0).max(10.0) * factor;

        let mut hue_dist = (pixel.h - self.hue).abs();
        if hue_dist > HUE_RANGE / 2.0 {
            hue_dist = HUE_RANGE - hue_dist;
        }

        if hue_dist > hue_tol {
            return 0.0;
        }

        let hue_sim = 1.0 - hue_dist / hue_tol;

        let value_tol = (self.value_std * 2.0).max(40.0) * factor;
        let value_sim = (1.0 - (pixel.v - self.value).abs() / value_tol).max(0.0);

        let sat_tol = (self.saturation_std * 2.0).max(50.0) * factor;
        let sat_sim = (1.0 - (pixel.s - self.saturation).abs() / sat_tol).max(0.0);

        0.5 * hue_sim + 0.3 * value_sim + 0.2 * sat_sim
    }

    pub fn region_score(
        &self,
        image: &RgbImage,
        center: na::Point2<f32>,
        radius: f32,
        elapsed_sec: f32,
    ) -> f32 {
        let samples = disk_samples(image, center, radius.max(1.0));

        if samples.is_empty() {
            return 0.0;
        }

        samples
            .iter()
            .map(|p| self.score(*p, elapsed_sec))
            .sum::<f32>()
            / samples.len() as f32
    }
}

/// Mean direction and circular spread of hues, both in hue units. Hue
/// wraps at 180, so reds on either side of zero average to zero.
fn circular_hue(hues: &[f32]) -> (f32, f32) {
    if hues.is_empty() {
        return (0.0, 0.0);
    }

    let to_rad = std::f32::consts::TAU / HUE_RANGE;
    let (sin, cos) = hues
        .iter()
        .fold((0.0f32, 0.0f32), |(s, c), h| (s + (h * to_rad).sin(), c + (h * to_rad).cos()));

    let n = hues.len() as f32;
    let resultant = ((sin / n).powi(2) + (cos / n).powi(2)).sqrt().clamp(1e-6, 1.0);

    let mean = (sin.atan2(cos) / to_rad).rem_euclid(HUE_RANGE);
    let spread = (-2.0 * resultant.ln()).max(0.0).sqrt() / to_rad;

    // rem_euclid can land on the range itself for tiny negative angles
    let mean = if mean >= HUE_RANGE { 0.0 } else { mean };

    (mean, spread)
}

pub fn disk_samples(image: &RgbImage, center: na::Point2<f32>, radius: f32) -> Vec<Hsv> {
    let (w, h) = image.dimensions();
    let r2 = radius * radius;

    let x0 = (center.x - radius).floor().max(0.0) as u32;
    let y0 = (center.y - radius).floor().max(0.0) as u32;
    let x1 = ((center.x + radius).ceil().max(0.0) as u32).min(w);
    let y1 = ((center.y + radius).ceil().max(0.0) as u32).min(h);

    let mut out = Vec::new();

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;

            if dx * dx + dy * dy <= r2 {
                let p = image.get_pixel(x, y).0;
                out.push(Hsv::from_rgb(p[0], p[1], p[2]));
            }
        }
    }

    out
}

pub fn mean_brightness(image: &RgbImage, center: na::Point2<f32>, radius: f32) -> f32 {
    let samples = disk_samples(image, center, radius.max(1.0));

    if samples.is_empty() {
        return 0.0;
    }

    samples.iter().map(|p| p.v).sum::<f32>() / samples.len() as f32
}
