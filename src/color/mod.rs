//! Palette and stable color assignment.
//!
//! Colors are a pure function of the layer key, so a metric or shape keeps
//! its color no matter how often it is toggled or what else is selected.

use crate::config::{default_colors, PaletteConfig};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the UTF-8 bytes of `key`.
pub fn stable_hash(key: &str) -> u32 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Ordered, fixed-length list of colors shared by all layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<String>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: default_colors(),
        }
    }
}

impl Palette {
    /// Build a palette; an empty list falls back to the default colors.
    pub fn new(colors: Vec<String>) -> Self {
        if colors.is_empty() {
            Self::default()
        } else {
            Self { colors }
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Color at `index`, wrapping around the palette.
    pub fn color(&self, index: usize) -> &str {
        &self.colors[index % self.colors.len()]
    }
}

impl From<&PaletteConfig> for Palette {
    fn from(config: &PaletteConfig) -> Self {
        Palette::new(config.colors.clone())
    }
}

/// Maps opaque keys to palette indices.
#[derive(Debug, Clone, Default)]
pub struct ColorAssigner {
    palette: Palette,
}

impl ColorAssigner {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Palette index for `key`. Distinct keys may share an index.
    pub fn color_index_of(&self, key: &str) -> usize {
        stable_hash(key) as usize % self.palette.len()
    }

    /// Palette index for a position in an ordered list.
    pub fn color_index_for_slot(&self, position: usize) -> usize {
        position % self.palette.len()
    }

    /// Resolved color for `key`.
    pub fn color_of(&self, key: &str) -> &str {
        self.palette.color(self.color_index_of(key))
    }
}

/// Mix a `#rrggbb` color toward its own luminance grey.
///
/// `amount` is clamped to `[0, 1]`; 1.0 yields pure grey. Strings that
/// are not six-digit hex colors are returned unchanged.
pub fn desaturate(color: &str, amount: f64) -> String {
    let Some((r, g, b)) = parse_hex(color) else {
        return color.to_string();
    };
    let amount = amount.clamp(0.0, 1.0);
    let grey = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    let mix = |c: u8| -> u8 {
        let value = f64::from(c) + (grey - f64::from(c)) * amount;
        value.round().clamp(0.0, 255.0) as u8
    };
    format!("#{:02x}{:02x}{:02x}", mix(r), mix(g), mix(b))
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_index_is_stable() {
        let assigner = ColorAssigner::default();
        let first = assigner.color_index_of("metric-311-requests");

        for other in ["a", "b", "potholes", "graffiti", ""] {
            assigner.color_index_of(other);
        }

        assert_eq!(assigner.color_index_of("metric-311-requests"), first);
        assert_eq!(
            ColorAssigner::default().color_index_of("metric-311-requests"),
            first
        );
    }

    #[test]
    fn test_color_index_in_range() {
        let assigner = ColorAssigner::new(Palette::new(vec![
            "#000000".to_string(),
            "#111111".to_string(),
            "#222222".to_string(),
        ]));
        for i in 0..200 {
            assert!(assigner.color_index_of(&format!("key-{}", i)) < 3);
        }
    }

    #[test]
    fn test_known_fnv_values() {
        assert_eq!(stable_hash(""), 0x811c_9dc5);
        assert_eq!(stable_hash("a"), 0xe40c_292c);
    }

    #[test]
    fn test_empty_palette_falls_back() {
        let palette = Palette::new(Vec::new());
        assert_eq!(palette.len(), 10);
        assert_eq!(palette.color(10), palette.color(0));
    }

    #[test]
    fn test_slot_wraps() {
        let assigner = ColorAssigner::default();
        assert_eq!(assigner.color_index_for_slot(3), 3);
        assert_eq!(assigner.color_index_for_slot(13), 3);
    }

    #[test]
    fn test_desaturate() {
        assert_eq!(desaturate("#ff0000", 0.0), "#ff0000");
        // Full desaturation of pure red lands on its luminance grey (0.299 * 255).
        assert_eq!(desaturate("#ff0000", 1.0), "#4c4c4c");
        assert_eq!(desaturate("#808080", 0.5), "#808080");
        assert_eq!(desaturate("tomato", 0.5), "tomato");
    }
}
