//! Storyreel platform core contracts.
//!
//! Feature detection happens exactly once per export: a [`CapabilityProbe`]
//! produces an immutable [`RuntimeCapabilities`] value which is then passed
//! explicitly to every downstream component. Nothing re-queries the runtime
//! mid-run.

use serde::{Deserialize, Serialize};
use storyreel_project_model::DeviceClass;

/// What the current runtime can do, captured once at pipeline start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCapabilities {
    /// Name of the media backend that answered the probe.
    pub backend: String,

    /// An H.264 encoder can be created.
    pub video_encoding: bool,

    /// An AAC encoder can be created.
    pub audio_encoding: bool,

    /// The backend can answer "is this configuration supported?" without
    /// constructing an encoder.
    pub config_query: bool,

    /// Video clips can be decoded into frames.
    pub video_decoding: bool,

    /// Compressed audio (beyond PCM WAV) can be decoded.
    pub compressed_audio_decoding: bool,

    pub device_class: DeviceClass,

    /// Logical CPUs available to the process.
    pub cpu_count: usize,

    /// Total system memory, when known.
    pub memory_bytes: Option<u64>,
}

impl RuntimeCapabilities {
    /// Reason the runtime cannot export at all, if any.
    pub fn missing_requirement(&self) -> Option<String> {
        if !self.video_encoding {
            return Some(format!(
                "No H.264 video encoder is available in the '{}' backend",
                self.backend
            ));
        }
        None
    }

    /// Override the detected device class.
    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = class;
        self
    }
}

/// Source of [`RuntimeCapabilities`].
pub trait CapabilityProbe: Send + Sync {
    /// Inspect the runtime. Called once per export run.
    fn probe(&self) -> RuntimeCapabilities;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Host resources relevant to choosing an output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub cpu_count: usize,
    pub memory_bytes: Option<u64>,
}

/// Machines at or below this many logical CPUs export at reduced size.
pub const CONSTRAINED_MAX_CPUS: usize = 2;

/// Machines with less memory than this export at reduced size.
pub const CONSTRAINED_MAX_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

impl HostResources {
    /// Inspect the current host.
    pub fn detect() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            cpu_count,
            memory_bytes: system_memory_bytes(),
        }
    }

    pub fn device_class(&self) -> DeviceClass {
        classify_device(self.cpu_count, self.memory_bytes)
    }
}

/// Classify a host by CPU count and memory. Unknown memory does not count
/// against the host.
pub fn classify_device(cpu_count: usize, memory_bytes: Option<u64>) -> DeviceClass {
    let low_cpu = cpu_count <= CONSTRAINED_MAX_CPUS;
    let low_memory = memory_bytes.is_some_and(|bytes| bytes < CONSTRAINED_MAX_MEMORY_BYTES);
    if low_cpu || low_memory {
        DeviceClass::Constrained
    } else {
        DeviceClass::Desktop
    }
}

/// Total memory from `/proc/meminfo`, when available.
pub fn system_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let bytes = parse_meminfo_total(&meminfo);
    if bytes.is_none() {
        tracing::debug!("MemTotal missing from /proc/meminfo");
    }
    bytes
}

/// Extract `MemTotal` (reported in kB) as bytes.
pub fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let mut parts = rest.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some("kB") | None => Some(value * 1024),
            Some(_) => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(video: bool) -> RuntimeCapabilities {
        RuntimeCapabilities {
            backend: "test".to_string(),
            video_encoding: video,
            audio_encoding: false,
            config_query: true,
            video_decoding: false,
            compressed_audio_decoding: false,
            device_class: DeviceClass::Desktop,
            cpu_count: 8,
            memory_bytes: None,
        }
    }

    #[test]
    fn test_classify_device() {
        assert_eq!(classify_device(8, Some(16 << 30)), DeviceClass::Desktop);
        assert_eq!(classify_device(2, Some(16 << 30)), DeviceClass::Constrained);
        assert_eq!(classify_device(8, Some(2 << 30)), DeviceClass::Constrained);
        assert_eq!(classify_device(4, None), DeviceClass::Desktop);
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16318412 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_meminfo_total(sample), Some(16_318_412 * 1024));
        assert_eq!(parse_meminfo_total("MemFree: 12 kB"), None);
        assert_eq!(parse_meminfo_total("MemTotal: lots kB"), None);
    }

    #[test]
    fn test_missing_video_encoder_reported() {
        let reason = caps(false).missing_requirement().unwrap();
        assert!(reason.contains("H.264"));
        assert!(caps(true).missing_requirement().is_none());
    }

    #[test]
    fn test_capabilities_serialize() {
        let json = serde_json::to_value(caps(true)).unwrap();
        assert_eq!(json["device_class"], "desktop");
        assert_eq!(json["video_encoding"], true);
    }
}
