//! Frame renderer.
//!
//! Walks a scene's planned frames, composes each one on the shared canvas
//! and hands it to the encode pipeline. Before every frame the loop checks
//! for cancellation and waits for encoder capacity. It yields to the runtime
//! at a fixed cadence so progress updates and cancel requests get through.

use storyreel_common::clock::YieldPacer;
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_project_model::{FillColor, Resolution};

use crate::assets::SceneAssets;
use crate::backend::VideoFrame;
use crate::compositor::FrameCanvas;
use crate::encode::EncodePipeline;
use crate::export::CancelFlag;
use crate::timeline::{FrameContent, Timeline};

pub struct FrameRenderer {
    canvas: FrameCanvas,
    pacer: YieldPacer,
    frames_rendered: u64,
}

impl FrameRenderer {
    pub fn new(resolution: Resolution, fill: FillColor, pacer: YieldPacer) -> Self {
        Self {
            canvas: FrameCanvas::new(resolution, fill),
            pacer,
            frames_rendered: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Render every frame of the scene at `assets.scene_index`.
    /// `on_frame` receives the running total after each submitted frame.
    pub async fn render_scene<F>(
        &mut self,
        timeline: &Timeline,
        assets: &mut SceneAssets,
        pipeline: &mut EncodePipeline,
        cancel: &CancelFlag,
        mut on_frame: F,
    ) -> StoryreelResult<u64>
    where
        F: FnMut(u64) + Send,
    {
        let scene_index = assets.scene_index;
        let number = assets.scene_number;
        let mut rendered = 0;

        for frame in timeline.frames(scene_index) {
            cancel.check()?;
            pipeline.wait_for_capacity().await?;

            let pixels = match frame.content {
                FrameContent::Image(image) => match assets.images.get(image) {
                    Some(still) => self.canvas.draw_still(scene_index, image, still),
                    None => self.canvas.fill_gap(),
                },
                FrameContent::VideoAt(source_secs) => {
                    let clip = assets.video.as_mut().ok_or_else(|| {
                        StoryreelError::asset(number, "video clip released before rendering")
                    })?;
                    let source = clip.frame_at(source_secs).map_err(|e| {
                        StoryreelError::for_scene(number, "video frame could not be decoded", e)
                    })?;
                    self.canvas.draw_frame(source)
                }
                FrameContent::Gap => self.canvas.fill_gap(),
            };

            pipeline.submit_video(
                &VideoFrame {
                    pixels,
                    timestamp_us: frame.timestamp_us,
                    duration_us: frame.duration_us,
                },
                frame.keyframe,
            )?;

            rendered += 1;
            self.frames_rendered += 1;
            on_frame(self.frames_rendered);

            if self.pacer.tick() {
                tokio::task::yield_now().await;
            }
        }

        self.canvas.release_scene();
        tracing::debug!(scene = number, frames = rendered, "Scene frames submitted");
        Ok(rendered)
    }
}
