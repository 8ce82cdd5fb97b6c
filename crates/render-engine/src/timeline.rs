//! Timeline planning.
//!
//! Turns scenes plus the durations of their loaded media into a fixed plan:
//! per-scene offsets, durations and frame counts in integer microseconds.
//! Frames are generated lazily from the plan.
//!
//! A scene's length is the first available of: narration length, declared
//! duration, video length, configured fallback. Video shorter than the scene
//! loops forward; longer video is truncated.

use serde::Serialize;
use storyreel_common::clock::{
    frame_duration_micros, frame_offset_micros, frames_for_duration, micros_to_secs,
    secs_to_micros,
};
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_project_model::Scene;

/// Durations of the media actually loaded for one scene.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaDurations {
    pub audio_secs: Option<f64>,
    pub video_secs: Option<f64>,
    /// Images that loaded successfully.
    pub image_count: usize,
}

impl MediaDurations {
    fn has_any(&self) -> bool {
        self.audio_secs.is_some() || self.video_secs.is_some() || self.image_count > 0
    }
}

/// What determined a scene's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    Audio,
    Declared,
    SourceMedia,
    Fallback,
}

/// What a scene shows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualPlan {
    /// Loop a clip of `source_us` microseconds.
    Video { source_us: i64 },
    /// Spread `count` stills evenly over the scene.
    Images { count: usize },
    /// Nothing to show; frames are solid fill.
    Gap,
}

/// Fixed plan for one scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenePlan {
    /// Position in the scene array.
    pub index: usize,
    /// Scene number from the manifest.
    pub number: u32,
    pub offset_us: i64,
    pub duration_us: i64,
    pub frame_count: u64,
    /// Global index of this scene's first frame.
    pub first_global_frame: u64,
    pub source: DurationSource,
    pub visual: VisualPlan,
    pub has_audio: bool,
}

impl ScenePlan {
    pub fn end_us(&self) -> i64 {
        self.offset_us + self.duration_us
    }
}

/// Plan for a whole export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub fps: u32,
    pub scenes: Vec<ScenePlan>,
    pub total_duration_us: i64,
    pub total_frames: u64,
}

impl Timeline {
    /// Frames of scene `index`, in order.
    pub fn frames(&self, index: usize) -> SceneFrames<'_> {
        SceneFrames {
            fps: self.fps,
            plan: self.scenes.get(index),
            next: 0,
            previous_image: None,
        }
    }

    /// Any scene carries narration.
    pub fn has_audio(&self) -> bool {
        self.scenes.iter().any(|s| s.has_audio)
    }

    /// Global keyframe cadence in frames.
    pub fn keyframe_interval(&self) -> u64 {
        (self.fps as u64 * 2).max(1)
    }

    pub fn total_duration_secs(&self) -> f64 {
        micros_to_secs(self.total_duration_us)
    }
}

/// What a single frame draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameContent {
    Image(usize),
    /// Source clip time in seconds.
    VideoAt(f64),
    Gap,
}

/// One output frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineFrame {
    pub scene_index: usize,
    pub frame_index: u64,
    pub global_index: u64,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub keyframe: bool,
    pub content: FrameContent,
}

/// Lazy frame generator for one scene.
pub struct SceneFrames<'a> {
    fps: u32,
    plan: Option<&'a ScenePlan>,
    next: u64,
    previous_image: Option<usize>,
}

impl Iterator for SceneFrames<'_> {
    type Item = TimelineFrame;

    fn next(&mut self) -> Option<TimelineFrame> {
        let plan = self.plan?;
        if self.next >= plan.frame_count {
            return None;
        }
        let i = self.next;
        self.next += 1;

        let local_us = frame_offset_micros(i, self.fps);
        // Never reach into the next scene.
        let timestamp_us = (plan.offset_us + local_us).min(plan.end_us() - 1);
        let global_index = plan.first_global_frame + i;

        let content = match plan.visual {
            VisualPlan::Video { source_us } => {
                FrameContent::VideoAt(micros_to_secs(local_us.rem_euclid(source_us.max(1))))
            }
            VisualPlan::Images { count } => {
                let image = (i as u128 * count as u128 / plan.frame_count as u128) as usize;
                FrameContent::Image(image.min(count.saturating_sub(1)))
            }
            VisualPlan::Gap => FrameContent::Gap,
        };

        let image_changed = match content {
            FrameContent::Image(image) => {
                let changed = self.previous_image.is_some_and(|prev| prev != image);
                self.previous_image = Some(image);
                changed
            }
            _ => false,
        };
        let keyframe =
            i == 0 || image_changed || global_index % (self.fps as u64 * 2).max(1) == 0;

        Some(TimelineFrame {
            scene_index: plan.index,
            frame_index: i,
            global_index,
            timestamp_us,
            duration_us: frame_duration_micros(self.fps),
            keyframe,
            content,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self
            .plan
            .map_or(0, |p| p.frame_count.saturating_sub(self.next)) as usize;
        (left, Some(left))
    }
}

/// Builds [`Timeline`]s.
#[derive(Debug, Clone, Copy)]
pub struct TimelinePlanner {
    pub fps: u32,
    pub fallback_secs: f64,
}

fn usable(secs: Option<f64>) -> Option<f64> {
    secs.filter(|s| s.is_finite() && *s > 0.0)
}

impl TimelinePlanner {
    pub fn new(fps: u32, fallback_secs: f64) -> Self {
        Self { fps, fallback_secs }
    }

    /// Plan `scenes` given what was loaded for each (same order and length).
    pub fn plan(&self, scenes: &[Scene], media: &[MediaDurations]) -> StoryreelResult<Timeline> {
        if self.fps == 0 {
            return Err(StoryreelError::invalid_input("fps must be positive"));
        }
        if scenes.is_empty() {
            return Err(StoryreelError::invalid_input("No scenes to export"));
        }
        if scenes.len() != media.len() {
            return Err(StoryreelError::invalid_input(format!(
                "{} scenes but media for {}",
                scenes.len(),
                media.len()
            )));
        }
        if !media.iter().any(MediaDurations::has_any) {
            return Err(StoryreelError::invalid_input(
                "No scene has any media that could be loaded",
            ));
        }

        let mut plans = Vec::with_capacity(scenes.len());
        let mut offset_us = 0i64;
        let mut first_global_frame = 0u64;

        for (index, (scene, loaded)) in scenes.iter().zip(media).enumerate() {
            let video_secs = usable(loaded.video_secs);
            let (secs, source) = if let Some(secs) = usable(loaded.audio_secs) {
                (secs, DurationSource::Audio)
            } else if let Some(secs) = scene.declared_duration() {
                (secs, DurationSource::Declared)
            } else if let Some(secs) = video_secs {
                (secs, DurationSource::SourceMedia)
            } else {
                (self.fallback_secs, DurationSource::Fallback)
            };
            let duration_us = secs_to_micros(secs).max(1);
            let frame_count = frames_for_duration(duration_us, self.fps);

            let visual = if let Some(video) = video_secs {
                VisualPlan::Video {
                    source_us: secs_to_micros(video).max(1),
                }
            } else if loaded.image_count > 0 {
                VisualPlan::Images {
                    count: loaded.image_count,
                }
            } else {
                VisualPlan::Gap
            };

            tracing::debug!(
                scene = scene.number,
                offset_us,
                duration_us,
                frame_count,
                source = ?source,
                visual = ?visual,
                "Planned scene"
            );

            plans.push(ScenePlan {
                index,
                number: scene.number,
                offset_us,
                duration_us,
                frame_count,
                first_global_frame,
                source,
                visual,
                has_audio: usable(loaded.audio_secs).is_some(),
            });
            offset_us += duration_us;
            first_global_frame += frame_count;
        }

        tracing::info!(
            scenes = plans.len(),
            total_frames = first_global_frame,
            duration_secs = micros_to_secs(offset_us),
            "Timeline planned"
        );

        Ok(Timeline {
            fps: self.fps,
            scenes: plans,
            total_duration_us: offset_us,
            total_frames: first_global_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn images(count: usize) -> MediaDurations {
        MediaDurations {
            image_count: count,
            ..MediaDurations::default()
        }
    }

    #[test]
    fn test_three_still_scenes_at_30fps() {
        let scenes: Vec<Scene> = (1..=3).map(|n| Scene::new(n).with_image("a.png")).collect();
        let timeline = TimelinePlanner::new(30, 5.0)
            .plan(&scenes, &[images(1); 3])
            .unwrap();
        assert_eq!(timeline.total_frames, 450);
        assert_eq!(timeline.scenes[1].offset_us, 5_000_000);
        assert_eq!(timeline.scenes[2].first_global_frame, 300);
        assert!(timeline.scenes.iter().all(|s| s.source == DurationSource::Fallback));
    }

    #[test]
    fn test_audio_duration_wins() {
        let scenes = vec![Scene::new(1).with_image("a.png").with_audio("a.wav").with_duration(9.0)];
        let media = [MediaDurations {
            audio_secs: Some(3.0),
            video_secs: None,
            image_count: 1,
        }];
        let timeline = TimelinePlanner::new(30, 5.0).plan(&scenes, &media).unwrap();
        assert_eq!(timeline.scenes[0].source, DurationSource::Audio);
        assert_eq!(timeline.scenes[0].frame_count, 90);
        assert!(timeline.has_audio());
    }

    #[test]
    fn test_declared_duration_before_video_length() {
        let scenes = vec![Scene::new(1).with_video("v.mp4").with_duration(2.0)];
        let media = [MediaDurations {
            video_secs: Some(7.0),
            ..MediaDurations::default()
        }];
        let timeline = TimelinePlanner::new(30, 5.0).plan(&scenes, &media).unwrap();
        assert_eq!(timeline.scenes[0].source, DurationSource::Declared);
        assert_eq!(timeline.scenes[0].duration_us, 2_000_000);
    }

    #[test]
    fn test_video_loops_forward() {
        let scenes = vec![Scene::new(1).with_video("v.mp4").with_duration(3.0)];
        let media = [MediaDurations {
            video_secs: Some(1.0),
            ..MediaDurations::default()
        }];
        let timeline = TimelinePlanner::new(10, 5.0).plan(&scenes, &media).unwrap();
        let times: Vec<f64> = timeline
            .frames(0)
            .map(|f| match f.content {
                FrameContent::VideoAt(t) => t,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(times.len(), 30);
        assert!((times[5] - 0.5).abs() < 1e-9);
        assert!(times[10].abs() < 1e-9);
        assert!((times[25] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_image_spread_and_keyframes() {
        let scenes = vec![Scene::new(1).with_images(["a", "b", "c"]).with_duration(3.0)];
        let timeline = TimelinePlanner::new(30, 5.0)
            .plan(&scenes, &[images(3)])
            .unwrap();
        let frames: Vec<TimelineFrame> = timeline.frames(0).collect();
        assert_eq!(frames[29].content, FrameContent::Image(0));
        assert_eq!(frames[30].content, FrameContent::Image(1));
        assert_eq!(frames[89].content, FrameContent::Image(2));
        let keyframes: Vec<u64> = frames.iter().filter(|f| f.keyframe).map(|f| f.frame_index).collect();
        assert_eq!(keyframes, vec![0, 30, 60]);
    }

    #[test]
    fn test_global_keyframe_cadence() {
        let scenes = vec![Scene::new(1).with_image("a").with_duration(5.0)];
        let timeline = TimelinePlanner::new(30, 5.0)
            .plan(&scenes, &[images(1)])
            .unwrap();
        let keyframes: Vec<u64> = timeline
            .frames(0)
            .filter(|f| f.keyframe)
            .map(|f| f.global_index)
            .collect();
        assert_eq!(keyframes, vec![0, 60, 120]);
    }

    #[test]
    fn test_failed_images_leave_a_gap() {
        let scenes = vec![
            Scene::new(1).with_image("broken.png"),
            Scene::new(2).with_image("ok.png"),
        ];
        let timeline = TimelinePlanner::new(30, 5.0)
            .plan(&scenes, &[images(0), images(1)])
            .unwrap();
        assert_eq!(timeline.scenes[0].visual, VisualPlan::Gap);
        assert_eq!(timeline.frames(0).next().unwrap().content, FrameContent::Gap);
    }

    #[test]
    fn test_rejects_empty_and_media_less_input() {
        let planner = TimelinePlanner::new(30, 5.0);
        assert!(planner.plan(&[], &[]).is_err());
        let scenes = vec![Scene::new(1).with_image("gone.png")];
        let err = planner.plan(&scenes, &[images(0)]).unwrap_err();
        assert!(matches!(err, StoryreelError::InvalidInput { .. }));
    }

    #[test]
    fn test_frames_of_unknown_scene_is_empty() {
        let scenes = vec![Scene::new(1).with_image("a")];
        let timeline = TimelinePlanner::new(30, 5.0)
            .plan(&scenes, &[images(1)])
            .unwrap();
        assert_eq!(timeline.frames(7).count(), 0);
    }

    proptest! {
        #[test]
        fn prop_timeline_is_contiguous_and_monotonic(
            durations in prop::collection::vec(0.05f64..12.0, 1..8),
            fps in prop::sample::select(vec![24u32, 25, 30, 60]),
        ) {
            let scenes: Vec<Scene> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| Scene::new(i as u32 + 1).with_image("a").with_duration(*d))
                .collect();
            let media = vec![images(1); scenes.len()];
            let timeline = TimelinePlanner::new(fps, 5.0).plan(&scenes, &media).unwrap();

            let mut expected_offset = 0i64;
            let mut last_ts = -1i64;
            let mut frame_sum = 0u64;
            for plan in &timeline.scenes {
                prop_assert_eq!(plan.offset_us, expected_offset);
                expected_offset += plan.duration_us;
                frame_sum += plan.frame_count;
                for frame in timeline.frames(plan.index) {
                    prop_assert!(frame.timestamp_us > last_ts);
                    prop_assert!(frame.timestamp_us < plan.end_us());
                    last_ts = frame.timestamp_us;
                }
            }
            prop_assert_eq!(frame_sum, timeline.total_frames);

            let total_secs: f64 = durations.iter().sum();
            let ideal = (total_secs * fps as f64).ceil() as i64;
            prop_assert!((frame_sum as i64 - ideal).abs() <= scenes.len() as i64);
        }

        #[test]
        fn prop_planning_is_deterministic(
            durations in prop::collection::vec(0.1f64..8.0, 1..6),
        ) {
            let scenes: Vec<Scene> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| Scene::new(i as u32 + 1).with_image("a").with_duration(*d))
                .collect();
            let media = vec![images(2); scenes.len()];
            let planner = TimelinePlanner::new(30, 5.0);
            prop_assert_eq!(
                planner.plan(&scenes, &media).unwrap(),
                planner.plan(&scenes, &media).unwrap()
            );
        }
    }
}
