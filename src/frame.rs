use image::{imageops, GrayImage, RgbImage};

pub struct Frame {
    pub index: usize,
    pub timestamp: f32, // in seconds
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, timestamp: f32, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let (w, h) = self.dims();
        w == 0 || h == 0
    }

    pub fn gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }
}
