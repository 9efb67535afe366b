use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Axis-aligned search rectangle in pixel space, left-top-width-height.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Region {
    #[inline]
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    #[inline]
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    #[inline]
    pub fn frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.x
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.y
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !(self.w >= 1.0 && self.h >= 1.0) // also catches NaN
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    #[inline]
    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        p.x >= self.left() && p.x < self.right() && p.y >= self.top() && p.y < self.bottom()
    }

    pub fn scaled(&self, factor: f32) -> Self {
        let c = self.center();
        Self::from_center(c.x, c.y, self.w * factor, self.h * factor)
    }

    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let l = self.left().max(0.0);
        let t = self.top().max(0.0);
        let r = self.right().min(width as f32);
        let b = self.bottom().min(height as f32);

        let clipped = Self::new(l, t, r - l, b - t);

        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// Integer pixel bounds `(x0, y0, x1, y1)`, end exclusive.
    pub fn pixel_bounds(&self) -> (u32, u32, u32, u32) {
        let x0 = self.left().max(0.0).floor() as u32;
        let y0 = self.top().max(0.0).floor() as u32;
        let x1 = self.right().max(0.0).ceil() as u32;
        let y1 = self.bottom().max(0.0).ceil() as u32;

        (x0, y0, x1.max(x0), y1.max(y0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_keeps_center() {
        let r = Region::new(10.0, 20.0, 40.0, 30.0);
        let s = r.scaled(2.0);

        assert_eq!(s.center(), r.center());
        assert_eq!(s.w, 80.0);
        assert_eq!(s.h, 60.0);
    }

    #[test]
    fn clip_to_frame() {
        let r = Region::new(-10.0, -10.0, 30.0, 30.0);
        let c = r.clip(100, 100).unwrap();

        assert_eq!(c, Region::new(0.0, 0.0, 20.0, 20.0));
        assert!(Region::new(200.0, 200.0, 10.0, 10.0).clip(100, 100).is_none());
    }

    #[test]
    fn degenerate_regions_are_empty() {
        assert!(Region::new(0.0, 0.0, 0.0, 10.0).is_empty());
        assert!(Region::new(0.0, 0.0, f32::NAN, 10.0).is_empty());
        assert!(!Region::new(0.0, 0.0, 1.0, 1.0).is_empty());
    }
}
