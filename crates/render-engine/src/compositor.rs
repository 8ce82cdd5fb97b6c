//! Frame compositor: fits stills and video frames onto the output canvas.
//!
//! Sources are scaled to fit inside the output (aspect preserved, centered)
//! and the remaining area is painted with the fill color. One RGBA buffer is
//! reused for every frame, so a `FrameCanvas` must only be driven from one
//! task at a time.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use storyreel_project_model::{FillColor, FitRect, Resolution};

/// Reusable output canvas.
pub struct FrameCanvas {
    buffer: RgbaImage,
    fill: Rgba<u8>,
    /// Scaled stills of the current scene, by image index.
    stills: Vec<Option<RgbaImage>>,
    stills_scene: Option<usize>,
    /// (scene, image) currently composed into `buffer`.
    composed: Option<(usize, usize)>,
    scale_ops: u64,
}

impl FrameCanvas {
    pub fn new(resolution: Resolution, fill: FillColor) -> Self {
        let fill = Rgba(fill.rgba());
        Self {
            buffer: RgbaImage::from_pixel(resolution.width, resolution.height, fill),
            fill,
            stills: Vec::new(),
            stills_scene: None,
            composed: None,
            scale_ops: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// The most recently composed frame.
    pub fn frame(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Number of resize operations performed, for cache checks.
    pub fn scale_ops(&self) -> u64 {
        self.scale_ops
    }

    /// Solid fill frame.
    pub fn fill_gap(&mut self) -> &RgbaImage {
        self.paint_background();
        self.composed = None;
        &self.buffer
    }

    /// Compose still `image_index` of `scene`. The scaled still is cached
    /// until the scene changes or [`release_scene`](Self::release_scene).
    pub fn draw_still(&mut self, scene: usize, image_index: usize, image: &RgbaImage) -> &RgbaImage {
        if self.composed == Some((scene, image_index)) {
            return &self.buffer;
        }
        if self.stills_scene != Some(scene) {
            self.stills.clear();
            self.stills_scene = Some(scene);
        }
        if self.stills.len() <= image_index {
            self.stills.resize(image_index + 1, None);
        }

        let (width, height) = self.buffer.dimensions();
        let rect = FitRect::contain(image.width(), image.height(), width, height);
        if self.stills[image_index].is_none() {
            let scaled = self.scale(image, rect);
            self.stills[image_index] = Some(scaled);
        }

        self.paint_background();
        if let Some(scaled) = &self.stills[image_index] {
            imageops::overlay(&mut self.buffer, scaled, rect.x as i64, rect.y as i64);
        }
        self.composed = Some((scene, image_index));
        &self.buffer
    }

    /// Compose a decoded video frame. Scaled every call.
    pub fn draw_frame(&mut self, source: &RgbaImage) -> &RgbaImage {
        let (width, height) = self.buffer.dimensions();
        let rect = FitRect::contain(source.width(), source.height(), width, height);
        self.paint_background();
        if source.dimensions() == (rect.width, rect.height) {
            imageops::overlay(&mut self.buffer, source, rect.x as i64, rect.y as i64);
        } else {
            let scaled = self.scale(source, rect);
            imageops::overlay(&mut self.buffer, &scaled, rect.x as i64, rect.y as i64);
        }
        self.composed = None;
        &self.buffer
    }

    /// Drop cached stills of the finished scene.
    pub fn release_scene(&mut self) {
        self.stills.clear();
        self.stills_scene = None;
        self.composed = None;
    }

    fn scale(&mut self, source: &RgbaImage, rect: FitRect) -> RgbaImage {
        if source.dimensions() == (rect.width, rect.height) {
            return source.clone();
        }
        self.scale_ops += 1;
        imageops::resize(source, rect.width, rect.height, FilterType::Triangle)
    }

    /// Paint the whole canvas; the source is blended over it so transparent
    /// pixels still end up opaque.
    fn paint_background(&mut self) {
        let fill = self.fill;
        for pixel in self.buffer.pixels_mut() {
            *pixel = fill;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> FrameCanvas {
        FrameCanvas::new(Resolution::new(160, 90), FillColor { r: 1, g: 2, b: 3 })
    }

    #[test]
    fn test_portrait_still_is_pillarboxed() {
        let mut canvas = canvas();
        let still = RgbaImage::from_pixel(90, 160, Rgba([200, 0, 0, 255]));
        let frame = canvas.draw_still(0, 0, &still).clone();
        assert_eq!(frame.dimensions(), (160, 90));
        assert_eq!(frame.get_pixel(0, 45).0, [1, 2, 3, 255]);
        assert_eq!(frame.get_pixel(80, 45).0, [200, 0, 0, 255]);
        assert_eq!(frame.get_pixel(159, 45).0, [1, 2, 3, 255]);
    }

    #[test]
    fn test_still_scaling_is_cached_per_scene() {
        let mut canvas = canvas();
        let still = RgbaImage::from_pixel(320, 180, Rgba([9, 9, 9, 255]));
        for _ in 0..10 {
            canvas.draw_still(0, 0, &still);
        }
        assert_eq!(canvas.scale_ops(), 1);

        canvas.release_scene();
        canvas.draw_still(1, 0, &still);
        assert_eq!(canvas.scale_ops(), 2);
    }

    #[test]
    fn test_switching_images_recomposes() {
        let mut canvas = canvas();
        let red = RgbaImage::from_pixel(160, 90, Rgba([255, 0, 0, 255]));
        let blue = RgbaImage::from_pixel(160, 90, Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.draw_still(0, 0, &red).get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(canvas.draw_still(0, 1, &blue).get_pixel(5, 5).0, [0, 0, 255, 255]);
        assert_eq!(canvas.draw_still(0, 0, &red).get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(canvas.scale_ops(), 0);
    }

    #[test]
    fn test_video_frames_and_gaps() {
        let mut canvas = canvas();
        let frame = RgbaImage::from_pixel(320, 180, Rgba([0, 255, 0, 255]));
        assert_eq!(canvas.draw_frame(&frame).get_pixel(10, 10).0, [0, 255, 0, 255]);
        assert_eq!(canvas.fill_gap().get_pixel(10, 10).0, [1, 2, 3, 255]);
    }

    #[test]
    fn test_transparent_still_sits_on_fill() {
        let mut canvas = canvas();
        let clear = RgbaImage::from_pixel(160, 90, Rgba([255, 255, 255, 0]));
        assert_eq!(canvas.draw_still(0, 0, &clear).get_pixel(3, 3).0, [1, 2, 3, 255]);
    }
}
