//! GStreamer backend.
//!
//! Encoders are `appsrc ! ... ! appsink` pipelines built from launch strings.
//! Raw frames are pushed with the `push-buffer` action signal and encoded
//! output is pulled with `try-pull-sample`, so only the core `gstreamer`
//! crate is needed. Decoding goes through `decodebin`.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use image::RgbaImage;
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_platform_core::{CapabilityProbe, HostResources, RuntimeCapabilities};

use super::native::NativeDecoder;
use super::{
    AudioChunk, AudioEncoder, DecodeLimits, DecodedAudio, EncodedChunk, EncoderEvent,
    EncoderFactory, EncoderOutput, MediaBackend, MediaDecoder, TrackKind, VideoClip, VideoEncoder,
    VideoFrame,
};
use crate::codec::{AudioCodecConfig, H264Profile, VideoCodecConfig};
use crate::mux::aac_audio_specific_config;

const H264_ENCODERS: [&str; 2] = ["x264enc", "openh264enc"];
const AAC_ENCODERS: [&str; 3] = ["avenc_aac", "fdkaacenc", "voaacenc"];
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn init_gstreamer() -> StoryreelResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(StoryreelError::capability(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn find_element(candidates: &[&'static str]) -> Option<&'static str> {
    candidates
        .iter()
        .copied()
        .find(|name| gst::ElementFactory::find(name).is_some())
}

fn nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

/// A launched `appsrc ! ... ! appsink` pipeline.
struct AppPipeline {
    name: String,
    pipeline: gst::Pipeline,
    src: gst::Element,
    sink: gst::Element,
}

impl AppPipeline {
    fn launch(name: impl Into<String>, launch: &str) -> StoryreelResult<Self> {
        init_gstreamer()?;
        let name = name.into();
        let element = gst::parse::launch(launch).map_err(|e| {
            StoryreelError::encoder(format!("Failed to build {name} pipeline: {e}"))
        })?;
        let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
            StoryreelError::encoder(format!("{name}: launch string did not produce a pipeline"))
        })?;
        let src = pipeline
            .by_name("src")
            .ok_or_else(|| StoryreelError::encoder(format!("{name}: appsrc missing")))?;
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| StoryreelError::encoder(format!("{name}: appsink missing")))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            StoryreelError::encoder(format!("Failed to start {name} pipeline: {e:?}"))
        })?;

        Ok(Self {
            name,
            pipeline,
            src,
            sink,
        })
    }

    fn push<T>(&self, data: T, pts_us: i64, duration_us: i64) -> StoryreelResult<()>
    where
        T: AsRef<[u8]> + Send + 'static,
    {
        let mut buffer = gst::Buffer::from_slice(data);
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| StoryreelError::encoder("buffer is not writable"))?;
            buffer.set_pts(gst::ClockTime::from_useconds(pts_us.max(0) as u64));
            buffer.set_duration(gst::ClockTime::from_useconds(duration_us.max(0) as u64));
        }
        let flow = self
            .src
            .emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]);
        if flow != gst::FlowReturn::Ok {
            return Err(StoryreelError::encoder(format!(
                "{}: push-buffer returned {flow:?}",
                self.name
            )));
        }
        Ok(())
    }

    fn pull(&self, timeout: Duration) -> Option<gst::Sample> {
        self.sink
            .emit_by_name::<Option<gst::Sample>>("try-pull-sample", &[&nanos(timeout)])
    }

    fn is_eos(&self) -> bool {
        self.sink.property::<bool>("eos")
    }

    fn end_of_stream(&self) {
        let _ = self.src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
    }

    /// First error posted on the bus, if any.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let message = bus.pop_filtered(&[gst::MessageType::Error])?;
        match message.view() {
            gst::MessageView::Error(e) => Some(format!("{}: {}", self.name, e.error())),
            _ => None,
        }
    }

    fn stop(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(pipeline = %self.name, error = ?e, "Failed to stop pipeline");
        }
    }
}

impl Drop for AppPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn codec_data(sample: &gst::Sample) -> Option<Bytes> {
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let buffer = structure.get::<gst::Buffer>("codec_data").ok()?;
    let map = buffer.map_readable().ok()?;
    Some(Bytes::copy_from_slice(map.as_slice()))
}

fn sample_bytes(sample: &gst::Sample) -> Option<(Bytes, &gst::BufferRef)> {
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    Some((Bytes::copy_from_slice(map.as_slice()), buffer))
}

/// H.264 encoder over `x264enc` or `openh264enc`.
struct GstVideoEncoder {
    app: AppPipeline,
    output: EncoderOutput,
    /// (timestamp, duration) of frames not yet delivered.
    pending: VecDeque<(i64, i64)>,
    decoder_config: Option<Bytes>,
    closed: bool,
}

impl GstVideoEncoder {
    fn deliver(&mut self, sample: gst::Sample) {
        if self.decoder_config.is_none() {
            self.decoder_config = codec_data(&sample);
        }
        let Some((data, buffer)) = sample_bytes(&sample) else {
            return;
        };
        let keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);
        let (timestamp_us, duration_us) = match self.pending.pop_front() {
            Some(submitted) => submitted,
            None => (
                buffer.pts().map_or(0, |t| t.useconds() as i64),
                buffer.duration().map_or(0, |t| t.useconds() as i64),
            ),
        };
        let _ = self.output.send(EncoderEvent::Chunk(EncodedChunk {
            track: TrackKind::Video,
            data,
            timestamp_us,
            duration_us,
            keyframe,
            decoder_config: if keyframe { self.decoder_config.clone() } else { None },
        }));
    }

    fn report_bus_error(&self) -> bool {
        match self.app.bus_error() {
            Some(message) => {
                let _ = self.output.send(EncoderEvent::Error {
                    track: TrackKind::Video,
                    message,
                });
                true
            }
            None => false,
        }
    }
}

impl VideoEncoder for GstVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame<'_>, keyframe: bool) -> StoryreelResult<()> {
        if self.closed {
            return Err(StoryreelError::encoder("video encoder is closed"));
        }
        if keyframe {
            // appsrc queues serialized events with its buffers, and the
            // running time pins the request to this frame.
            let at = gst::ClockTime::from_useconds(frame.timestamp_us.max(0) as u64);
            let structure = gst::Structure::builder("GstForceKeyUnit")
                .field("timestamp", at)
                .field("stream-time", at)
                .field("running-time", at)
                .field("all-headers", true)
                .field("count", 0u32)
                .build();
            self.app
                .src
                .send_event(gst::event::CustomDownstream::new(structure));
        }
        self.app.push(
            frame.pixels.as_raw().clone(),
            frame.timestamp_us,
            frame.duration_us,
        )?;
        self.pending
            .push_back((frame.timestamp_us, frame.duration_us));
        self.poll()
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    fn poll(&mut self) -> StoryreelResult<()> {
        if self.report_bus_error() {
            return Ok(());
        }
        while let Some(sample) = self.app.pull(Duration::ZERO) {
            self.deliver(sample);
        }
        Ok(())
    }

    fn flush(&mut self) -> StoryreelResult<()> {
        self.app.end_of_stream();
        let deadline = std::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.app.is_eos() {
            if self.report_bus_error() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(StoryreelError::timeout("draining the video encoder", DRAIN_TIMEOUT));
            }
            if let Some(sample) = self.app.pull(remaining.min(Duration::from_millis(100))) {
                self.deliver(sample);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.app.stop();
        }
    }
}

/// AAC encoder over the first available AAC element.
struct GstAudioEncoder {
    app: AppPipeline,
    output: EncoderOutput,
    config: AudioCodecConfig,
    pending: VecDeque<(i64, i64)>,
    decoder_config: Option<Bytes>,
    closed: bool,
}

impl GstAudioEncoder {
    fn deliver(&mut self, sample: gst::Sample) {
        let config = codec_data(&sample).unwrap_or_else(|| {
            aac_audio_specific_config(self.config.sample_rate, self.config.channels)
        });
        let decoder_config = self.decoder_config.get_or_insert(config).clone();
        let Some((data, buffer)) = sample_bytes(&sample) else {
            return;
        };
        let (timestamp_us, duration_us) = self.pending.pop_front().unwrap_or((
            buffer.pts().map_or(0, |t| t.useconds() as i64),
            buffer.duration().map_or(0, |t| t.useconds() as i64),
        ));
        let _ = self.output.send(EncoderEvent::Chunk(EncodedChunk {
            track: TrackKind::Audio,
            data,
            timestamp_us,
            duration_us,
            keyframe: true,
            decoder_config: Some(decoder_config),
        }));
    }
}

impl AudioEncoder for GstAudioEncoder {
    fn encode(&mut self, chunk: &AudioChunk) -> StoryreelResult<()> {
        if self.closed {
            return Err(StoryreelError::encoder("audio encoder is closed"));
        }
        let data: Vec<u8> = chunk
            .samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        self.app
            .push(data, chunk.timestamp_us(), chunk.duration_us())?;
        self.pending
            .push_back((chunk.timestamp_us(), chunk.duration_us()));
        self.poll()
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    fn poll(&mut self) -> StoryreelResult<()> {
        if let Some(message) = self.app.bus_error() {
            let _ = self.output.send(EncoderEvent::Error {
                track: TrackKind::Audio,
                message,
            });
            return Ok(());
        }
        while let Some(sample) = self.app.pull(Duration::ZERO) {
            self.deliver(sample);
        }
        Ok(())
    }

    fn flush(&mut self) -> StoryreelResult<()> {
        self.app.end_of_stream();
        let deadline = std::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.app.is_eos() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(StoryreelError::timeout("draining the audio encoder", DRAIN_TIMEOUT));
            }
            if let Some(sample) = self.app.pull(remaining.min(Duration::from_millis(100))) {
                self.deliver(sample);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.app.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GstEncoderFactory;

impl GstEncoderFactory {
    fn video_element(&self, profile: H264Profile) -> Option<&'static str> {
        match profile {
            // openh264 only produces constrained baseline.
            H264Profile::Baseline => find_element(&H264_ENCODERS),
            H264Profile::Main | H264Profile::High => find_element(&H264_ENCODERS[..1]),
        }
    }

    fn video_launch(&self, element: &str, config: &VideoCodecConfig) -> String {
        let kbps = (config.bitrate_bps / 1000).max(1);
        let encoder = match element {
            "x264enc" => format!(
                "x264enc bitrate={kbps} key-int-max={} speed-preset=veryfast tune=zerolatency bframes=0",
                config.keyframe_interval
            ),
            other => format!("{other} bitrate={} gop-size={}", config.bitrate_bps, config.keyframe_interval),
        };
        format!(
            "appsrc name=src format=time is-live=false \
             caps=video/x-raw,format=RGBA,width={w},height={h},framerate={fps}/1 \
             ! videoconvert ! video/x-raw,format=I420 ! {encoder} \
             ! h264parse ! video/x-h264,profile={profile},stream-format=avc,alignment=au \
             ! appsink name=sink sync=false",
            w = config.width,
            h = config.height,
            fps = config.fps,
            profile = config.profile.caps_name(),
        )
    }
}

impl EncoderFactory for GstEncoderFactory {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_video_config_supported(&self, config: &VideoCodecConfig) -> StoryreelResult<bool> {
        init_gstreamer()?;
        Ok(self.video_element(config.profile).is_some())
    }

    fn is_audio_config_supported(&self, config: &AudioCodecConfig) -> StoryreelResult<bool> {
        init_gstreamer()?;
        Ok(find_element(&AAC_ENCODERS).is_some()
            && matches!(config.sample_rate, 44_100 | 48_000)
            && (1..=2).contains(&config.channels))
    }

    fn create_video_encoder(
        &self,
        config: &VideoCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn VideoEncoder>> {
        init_gstreamer()?;
        let element = self.video_element(config.profile).ok_or_else(|| {
            StoryreelError::encoder(format!("no GStreamer encoder for {}", config.codec))
        })?;
        let app = AppPipeline::launch(format!("{element}-video"), &self.video_launch(element, config))?;
        tracing::debug!(element, codec = %config.codec, "GStreamer video encoder ready");
        Ok(Box::new(GstVideoEncoder {
            app,
            output,
            pending: VecDeque::new(),
            decoder_config: None,
            closed: false,
        }))
    }

    fn create_audio_encoder(
        &self,
        config: &AudioCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn AudioEncoder>> {
        init_gstreamer()?;
        let element = find_element(&AAC_ENCODERS)
            .ok_or_else(|| StoryreelError::encoder("no GStreamer AAC encoder"))?;
        let launch = format!(
            "appsrc name=src format=time is-live=false \
             caps=audio/x-raw,format=F32LE,layout=interleaved,rate={rate},channels={channels} \
             ! audioconvert ! {element} bitrate={bitrate} \
             ! audio/mpeg,mpegversion=4,stream-format=raw \
             ! appsink name=sink sync=false",
            rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate_bps,
        );
        let app = AppPipeline::launch(format!("{element}-audio"), &launch)?;
        tracing::debug!(element, codec = %config.codec, "GStreamer audio encoder ready");
        Ok(Box::new(GstAudioEncoder {
            app,
            output,
            config: config.clone(),
            pending: VecDeque::new(),
            decoder_config: None,
            closed: false,
        }))
    }
}

const VIDEO_DECODE_LAUNCH: &str = "appsrc name=src ! decodebin ! videoconvert \
     ! video/x-raw,format=RGBA ! appsink name=sink sync=false max-buffers=2";

struct DecodedFrame {
    pts_us: i64,
    end_us: i64,
    image: RgbaImage,
}

fn decoded_frame(sample: &gst::Sample) -> Option<DecodedFrame> {
    let s = sample.caps()?.structure(0)?;
    let (Ok(width), Ok(height)) = (s.get::<i32>("width"), s.get::<i32>("height")) else {
        return None;
    };
    let (bytes, buffer) = sample_bytes(sample)?;
    let pts_us = buffer.pts().map_or(0, |t| t.useconds() as i64);
    let end_us = pts_us + buffer.duration().map_or(0, |t| t.useconds() as i64);
    let image = RgbaImage::from_raw(width as u32, height as u32, bytes.to_vec())?;
    Some(DecodedFrame {
        pts_us,
        end_us,
        image,
    })
}

/// One forward decoding pass over a clip. The appsink holds at most two
/// decoded frames, so decodebin blocks until they are pulled.
struct GstFrameStream {
    app: AppPipeline,
}

impl GstFrameStream {
    fn start(data: &Bytes) -> StoryreelResult<Self> {
        let app = AppPipeline::launch("video-decode", VIDEO_DECODE_LAUNCH)?;
        app.push(data.clone(), 0, 0)?;
        app.end_of_stream();
        Ok(Self { app })
    }

    /// Next frame in presentation order, `None` once the clip is exhausted.
    fn next_frame(
        &self,
        deadline: Instant,
        limit: Duration,
        operation: &str,
    ) -> StoryreelResult<Option<DecodedFrame>> {
        loop {
            if let Some(message) = self.app.bus_error() {
                return Err(StoryreelError::unsupported(message));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.app.pull(remaining.min(Duration::from_millis(100))) {
                Some(sample) => {
                    if let Some(frame) = decoded_frame(&sample) {
                        return Ok(Some(frame));
                    }
                }
                None if self.app.is_eos() => return Ok(None),
                None if remaining.is_zero() => {
                    return Err(StoryreelError::timeout(operation, limit));
                }
                None => {}
            }
        }
    }
}

/// Clip decoded on demand from its compressed bytes.
///
/// Frames are requested in increasing source time, except when a scene
/// loops the clip; a request before the current frame restarts decoding.
/// Only the current and the next decoded frame are kept.
struct GstVideoClip {
    data: Bytes,
    stream: Option<GstFrameStream>,
    current: Option<DecodedFrame>,
    upcoming: Option<DecodedFrame>,
    first_pts_us: i64,
    duration_secs: f64,
    dimensions: (u32, u32),
    seek_limit: Duration,
}

impl GstVideoClip {
    fn rewind(&mut self, deadline: Instant) -> StoryreelResult<()> {
        self.stream = None;
        self.upcoming = None;
        let stream = GstFrameStream::start(&self.data)?;
        self.current = stream.next_frame(deadline, self.seek_limit, "seeking the video clip")?;
        self.stream = Some(stream);
        Ok(())
    }
}

impl VideoClip for GstVideoClip {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn frame_at(&mut self, source_secs: f64) -> StoryreelResult<&RgbaImage> {
        let target = (source_secs * 1_000_000.0).round() as i64;
        let deadline = Instant::now() + self.seek_limit;
        let behind = match &self.current {
            Some(frame) => frame.pts_us > target && frame.pts_us > self.first_pts_us,
            None => true,
        };
        if behind {
            tracing::trace!(target_us = target, "Restarting clip decode");
            self.rewind(deadline)?;
        }

        loop {
            if self.upcoming.is_none() {
                let Some(stream) = self.stream.as_ref() else {
                    break;
                };
                match stream.next_frame(deadline, self.seek_limit, "seeking the video clip")? {
                    Some(frame) => self.upcoming = Some(frame),
                    None => {
                        self.stream = None;
                        break;
                    }
                }
            }
            match self.upcoming.take() {
                Some(next) if next.pts_us <= target => self.current = Some(next),
                other => {
                    self.upcoming = other;
                    break;
                }
            }
        }

        self.current
            .as_ref()
            .map(|frame| &frame.image)
            .ok_or_else(|| StoryreelError::invalid_input("video clip has no frames"))
    }

    fn close(&mut self) {
        self.stream = None;
        self.current = None;
        self.upcoming = None;
    }
}

/// `decodebin` based decoder; images and WAV stay on the native path.
#[derive(Debug, Default)]
pub struct GstDecoder {
    native: NativeDecoder,
}

impl GstDecoder {
    /// Push `data` through `chain` and collect every output sample.
    fn decode_all(
        &self,
        name: &str,
        chain: &str,
        data: &[u8],
        limit: Duration,
    ) -> StoryreelResult<Vec<gst::Sample>> {
        let launch = format!("appsrc name=src ! decodebin ! {chain} ! appsink name=sink sync=false");
        let app = AppPipeline::launch(name, &launch)?;
        app.push(data.to_vec(), 0, 0)?;
        app.end_of_stream();

        let mut samples = Vec::new();
        let deadline = std::time::Instant::now() + limit;
        while !app.is_eos() {
            if let Some(message) = app.bus_error() {
                return Err(StoryreelError::unsupported(message));
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(StoryreelError::timeout(format!("decoding with {name}"), limit));
            }
            if let Some(sample) = app.pull(remaining.min(Duration::from_millis(100))) {
                samples.push(sample);
            }
        }
        Ok(samples)
    }
}

impl MediaDecoder for GstDecoder {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn decode_image(&self, data: &[u8]) -> StoryreelResult<RgbaImage> {
        self.native.decode_image(data)
    }

    fn decode_audio(&self, data: &[u8]) -> StoryreelResult<DecodedAudio> {
        if let Ok(audio) = self.native.decode_audio(data) {
            return Ok(audio);
        }
        let samples = self.decode_all(
            "audio-decode",
            "audioconvert ! audio/x-raw,format=F32LE,layout=interleaved",
            data,
            DRAIN_TIMEOUT * 3,
        )?;

        let mut rate = 0;
        let mut channels: Vec<Vec<f32>> = Vec::new();
        for sample in &samples {
            if let Some(s) = sample.caps().and_then(|caps| caps.structure(0)) {
                rate = s.get::<i32>("rate").unwrap_or(rate as i32) as u32;
                let count = s.get::<i32>("channels").unwrap_or(1).max(1) as usize;
                if channels.len() != count {
                    channels = vec![Vec::new(); count];
                }
            }
            let Some((data, _)) = sample_bytes(sample) else {
                continue;
            };
            let count = channels.len().max(1);
            if channels.is_empty() {
                channels.push(Vec::new());
            }
            for (i, bytes) in data.chunks_exact(4).enumerate() {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                channels[i % count].push(value);
            }
        }
        if rate == 0 || channels.is_empty() {
            return Err(StoryreelError::unsupported("audio decoded to no samples"));
        }
        Ok(DecodedAudio {
            sample_rate: rate,
            channels,
        })
    }

    fn open_video(&self, data: Bytes, limits: DecodeLimits) -> StoryreelResult<Box<dyn VideoClip>> {
        const OPERATION: &str = "reading video metadata";
        let deadline = Instant::now() + limits.metadata;

        let stream = GstFrameStream::start(&data)?;
        let first = stream
            .next_frame(deadline, limits.metadata, OPERATION)?
            .ok_or_else(|| StoryreelError::unsupported("video decoded to no frames"))?;
        let reported = stream
            .app
            .pipeline
            .query_duration::<gst::ClockTime>()
            .map(|d| d.useconds() as i64)
            .filter(|us| *us > 0);
        let end_us = match reported {
            Some(us) => us,
            None => {
                // No container duration; walk the clip once without keeping frames.
                let mut end_us = first.end_us;
                while let Some(frame) = stream.next_frame(deadline, limits.metadata, OPERATION)? {
                    end_us = end_us.max(frame.end_us);
                }
                end_us
            }
        };
        drop(stream);

        let dimensions = first.image.dimensions();
        tracing::debug!(
            width = dimensions.0,
            height = dimensions.1,
            duration_us = end_us,
            compressed_bytes = data.len(),
            "Video clip opened"
        );
        Ok(Box::new(GstVideoClip {
            data,
            stream: None,
            current: None,
            upcoming: None,
            first_pts_us: first.pts_us,
            duration_secs: end_us as f64 / 1_000_000.0,
            dimensions,
            seek_limit: limits.seek,
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GstProbe;

impl CapabilityProbe for GstProbe {
    fn probe(&self) -> RuntimeCapabilities {
        let ready = init_gstreamer().is_ok();
        let host = HostResources::detect();
        let decodebin = ready && gst::ElementFactory::find("decodebin").is_some();
        RuntimeCapabilities {
            backend: "gstreamer".to_string(),
            video_encoding: ready && find_element(&H264_ENCODERS).is_some(),
            audio_encoding: ready && find_element(&AAC_ENCODERS).is_some(),
            config_query: true,
            video_decoding: decodebin,
            compressed_audio_decoding: decodebin,
            device_class: host.device_class(),
            cpu_count: host.cpu_count,
            memory_bytes: host.memory_bytes,
        }
    }

    fn name(&self) -> &str {
        "gstreamer"
    }
}

pub fn gst_backend() -> StoryreelResult<MediaBackend> {
    init_gstreamer()?;
    Ok(MediaBackend {
        encoders: std::sync::Arc::new(GstEncoderFactory),
        decoder: std::sync::Arc::new(GstDecoder::default()),
        probe: std::sync::Arc::new(GstProbe),
    })
}
