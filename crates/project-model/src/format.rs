//! Output format presets and device classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output aspect preset. Immutable for the duration of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// 16:9 widescreen.
    #[default]
    Landscape,
    /// 9:16 vertical (social media).
    Portrait,
    /// 1:1 square.
    Square,
}

/// Coarse performance class of the exporting machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    /// Low core count or little memory; exports at 720p-class sizes.
    Constrained,
}

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [
        ExportFormat::Landscape,
        ExportFormat::Portrait,
        ExportFormat::Square,
    ];

    /// Concrete frame size for this preset on the given device class.
    pub fn resolution(self, class: DeviceClass) -> Resolution {
        match (self, class) {
            (ExportFormat::Landscape, DeviceClass::Desktop) => Resolution::new(1920, 1080),
            (ExportFormat::Portrait, DeviceClass::Desktop) => Resolution::new(1080, 1920),
            (ExportFormat::Square, DeviceClass::Desktop) => Resolution::new(1080, 1080),
            (ExportFormat::Landscape, DeviceClass::Constrained) => Resolution::new(1280, 720),
            (ExportFormat::Portrait, DeviceClass::Constrained) => Resolution::new(720, 1280),
            (ExportFormat::Square, DeviceClass::Constrained) => Resolution::new(720, 720),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Landscape => "landscape",
            ExportFormat::Portrait => "portrait",
            ExportFormat::Square => "square",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landscape" | "16:9" => Ok(ExportFormat::Landscape),
            "portrait" | "9:16" => Ok(ExportFormat::Portrait),
            "square" | "1:1" => Ok(ExportFormat::Square),
            other => Err(format!(
                "unknown format '{other}' (expected landscape, portrait or square)"
            )),
        }
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceClass::Desktop),
            "constrained" | "mobile" => Ok(DeviceClass::Constrained),
            other => Err(format!(
                "unknown device class '{other}' (expected desktop or constrained)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_resolutions() {
        assert_eq!(
            ExportFormat::Landscape.resolution(DeviceClass::Desktop),
            Resolution::new(1920, 1080)
        );
        assert_eq!(
            ExportFormat::Portrait.resolution(DeviceClass::Desktop),
            Resolution::new(1080, 1920)
        );
        assert_eq!(
            ExportFormat::Square.resolution(DeviceClass::Desktop),
            Resolution::new(1080, 1080)
        );
    }

    #[test]
    fn test_constrained_devices_get_smaller_frames() {
        for format in ExportFormat::ALL {
            let desktop = format.resolution(DeviceClass::Desktop);
            let constrained = format.resolution(DeviceClass::Constrained);
            assert!(constrained.pixel_count() < desktop.pixel_count());
            assert_eq!(constrained.width % 2, 0);
            assert_eq!(constrained.height % 2, 0);
        }
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("Portrait".parse::<ExportFormat>(), Ok(ExportFormat::Portrait));
        assert_eq!("1:1".parse::<ExportFormat>(), Ok(ExportFormat::Square));
        assert!("cinema".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_format_serde_lowercase() {
        let json = serde_json::to_string(&ExportFormat::Landscape).unwrap();
        assert_eq!(json, "\"landscape\"");
        let class: DeviceClass = serde_json::from_str("\"constrained\"").unwrap();
        assert_eq!(class, DeviceClass::Constrained);
    }
}
