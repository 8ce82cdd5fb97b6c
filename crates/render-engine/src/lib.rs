//! Storyreel Render Engine
//!
//! Client-side export pipeline that turns an ordered list of narrated
//! scenes into a single MP4 file, without a transcoding server.
//!
//! # Pipeline Architecture
//!
//! ```text
//! scenes ──► Asset Loader ──► Timeline Planner ──► Codec Negotiator
//!  (fetch, assets)            (timeline)            (codec)
//!                                                       │
//!                 ┌─────────────── per scene ───────────┤
//!                 ▼                                     ▼
//!          Frame Renderer                        Audio Renderer
//!        (compositor, frames)                       (audio)
//!                 └────────► Encode/Mux ◄───────────────┘
//!                            (encode, mux)
//!                                  │
//!                                  ▼
//!                      Export Controller (export)
//!                      state, progress, retries, upload (store)
//! ```
//!
//! Codec libraries sit behind the traits in [`backend`]; the controller only
//! sees a [`backend::MediaBackend`].

pub mod assets;
pub mod audio;
pub mod backend;
pub mod codec;
pub mod compositor;
pub mod encode;
pub mod export;
pub mod fetch;
pub mod frames;
pub mod mux;
pub mod store;
pub mod timeline;

pub use export::*;
