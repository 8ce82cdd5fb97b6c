//! Framing geometry for compositing sources onto the output canvas.

use serde::{Deserialize, Serialize};

/// Pixel rectangle inside the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FitRect {
    /// Largest aspect-preserving rectangle for a `src_w × src_h` source that
    /// fits inside `dst_w × dst_h`, centered. Padding falls on one axis only.
    pub fn contain(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
            return Self {
                x: 0,
                y: 0,
                width: dst_w,
                height: dst_h,
            };
        }

        // Compare src_w/src_h against dst_w/dst_h without floats.
        let src_wide = src_w as u64 * dst_h as u64 >= dst_w as u64 * src_h as u64;
        let (width, height) = if src_wide {
            let h = (dst_w as u64 * src_h as u64 + src_w as u64 / 2) / src_w as u64;
            (dst_w, (h as u32).clamp(1, dst_h))
        } else {
            let w = (dst_h as u64 * src_w as u64 + src_h as u64 / 2) / src_h as u64;
            ((w as u32).clamp(1, dst_w), dst_h)
        };

        Self {
            x: (dst_w - width) / 2,
            y: (dst_h - height) / 2,
            width,
            height,
        }
    }
}

/// Solid RGB fill used for letterbox bars and gap scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FillColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl FillColor {
    pub const BLACK: FillColor = FillColor { r: 0, g: 0, b: 0 };

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid color '{hex}' (expected #rrggbb)"));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|e| e.to_string())
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    /// Opaque RGBA bytes.
    pub fn rgba(&self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wide_source_letterboxes_vertically() {
        let rect = FitRect::contain(1920, 1080, 1080, 1920);
        assert_eq!(rect.width, 1080);
        assert_eq!(rect.height, 608);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, (1920 - 608) / 2);
    }

    #[test]
    fn test_tall_source_pillarboxes() {
        let rect = FitRect::contain(1080, 1920, 1920, 1080);
        assert_eq!(rect.height, 1080);
        assert_eq!(rect.width, 608);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.x, (1920 - 608) / 2);
    }

    #[test]
    fn test_matching_aspect_covers_canvas() {
        let rect = FitRect::contain(640, 360, 1920, 1080);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 1920, 1080));
    }

    #[test]
    fn test_degenerate_source_fills_canvas() {
        let rect = FitRect::contain(0, 10, 720, 720);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 720, 720));
    }

    #[test]
    fn test_parse_fill_color() {
        assert_eq!(
            FillColor::from_hex("#1a2B3c").unwrap(),
            FillColor {
                r: 0x1a,
                g: 0x2b,
                b: 0x3c
            }
        );
        assert_eq!(FillColor::from_hex("000000").unwrap(), FillColor::BLACK);
        assert!(FillColor::from_hex("#12345").is_err());
        assert!(FillColor::from_hex("#gg0000").is_err());
    }

    proptest! {
        #[test]
        fn prop_contain_stays_inside_canvas(
            sw in 1u32..5000, sh in 1u32..5000, dw in 1u32..2500, dh in 1u32..2500
        ) {
            let rect = FitRect::contain(sw, sh, dw, dh);
            prop_assert!(rect.x + rect.width <= dw);
            prop_assert!(rect.y + rect.height <= dh);
            prop_assert!(rect.width == dw || rect.height == dh);
        }
    }
}
