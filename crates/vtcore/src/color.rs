//! Terminal color palette and X11 color-spec parsing.
//!
//! Holds the 256-entry palette (mutable via OSC 4, reset via OSC 104) and
//! the special foreground/background/cursor colors (OSC 10/11/12, reset via
//! OSC 110/111/112). Query replies use the 16-bit-per-channel `rgb:` form
//! xterm emits.

/// RGB color tuple (R, G, B).
pub type Rgb = (u8, u8, u8);

/// Default foreground: white.
pub const DEFAULT_FOREGROUND: Rgb = (255, 255, 255);
/// Default background: black.
pub const DEFAULT_BACKGROUND: Rgb = (0, 0, 0);
/// Default cursor color: white.
pub const DEFAULT_CURSOR: Rgb = (255, 255, 255);

/// Default palette entry (xterm defaults).
///
/// - 0-7: standard colors, 8-15: bright variants
/// - 16-231: 6x6x6 color cube
/// - 232-255: grayscale ramp
#[must_use]
pub const fn default_palette_color(index: u8) -> Rgb {
    const ANSI_16: [Rgb; 16] = [
        (0, 0, 0),       // 0: black
        (205, 0, 0),     // 1: red
        (0, 205, 0),     // 2: green
        (205, 205, 0),   // 3: yellow
        (0, 0, 238),     // 4: blue
        (205, 0, 205),   // 5: magenta
        (0, 205, 205),   // 6: cyan
        (229, 229, 229), // 7: white
        (127, 127, 127), // 8: bright black
        (255, 0, 0),     // 9: bright red
        (0, 255, 0),     // 10: bright green
        (255, 255, 0),   // 11: bright yellow
        (92, 92, 255),   // 12: bright blue
        (255, 0, 255),   // 13: bright magenta
        (0, 255, 255),   // 14: bright cyan
        (255, 255, 255), // 15: bright white
    ];

    if index < 16 {
        ANSI_16[index as usize]
    } else if index < 232 {
        let idx = index - 16;
        let r = if idx / 36 == 0 { 0 } else { 55 + (idx / 36) * 40 };
        let g = if (idx % 36) / 6 == 0 {
            0
        } else {
            55 + ((idx % 36) / 6) * 40
        };
        let b = if idx % 6 == 0 { 0 } else { 55 + (idx % 6) * 40 };
        (r, g, b)
    } else {
        let gray = 8 + (index - 232) * 10;
        (gray, gray, gray)
    }
}

/// The mutable palette plus special colors.
#[derive(Debug, Clone)]
pub struct ColorPalette {
    colors: [Rgb; 256],
    /// Default text color (OSC 10).
    pub foreground: Rgb,
    /// Default background color (OSC 11).
    pub background: Rgb,
    /// Cursor color (OSC 12).
    pub cursor: Rgb,
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorPalette {
    /// Palette with xterm defaults.
    #[must_use]
    pub fn new() -> Self {
        let mut colors = [(0, 0, 0); 256];
        let mut i = 0usize;
        while i < 256 {
            colors[i] = default_palette_color(i as u8);
            i += 1;
        }
        Self {
            colors,
            foreground: DEFAULT_FOREGROUND,
            background: DEFAULT_BACKGROUND,
            cursor: DEFAULT_CURSOR,
        }
    }

    /// Current color of a palette entry.
    #[must_use]
    pub fn get(&self, index: u8) -> Rgb {
        self.colors[usize::from(index)]
    }

    /// Override a palette entry (OSC 4).
    pub fn set(&mut self, index: u8, rgb: Rgb) {
        self.colors[usize::from(index)] = rgb;
    }

    /// Reset one palette entry to its default (OSC 104 with argument).
    pub fn reset(&mut self, index: u8) {
        self.colors[usize::from(index)] = default_palette_color(index);
    }

    /// Reset the whole palette (bare OSC 104).
    pub fn reset_all(&mut self) {
        for i in 0..256usize {
            self.colors[i] = default_palette_color(i as u8);
        }
    }

    /// Reset the special colors (OSC 110/111/112).
    pub fn reset_foreground(&mut self) {
        self.foreground = DEFAULT_FOREGROUND;
    }
    pub fn reset_background(&mut self) {
        self.background = DEFAULT_BACKGROUND;
    }
    pub fn reset_cursor(&mut self) {
        self.cursor = DEFAULT_CURSOR;
    }
}

/// Parse an X11 color spec: `rgb:R/G/B` (1-4 hex digits per channel) or
/// `#RGB` / `#RRGGBB` / `#RRRRGGGGBBBB`.
#[must_use]
pub fn parse_color_spec(spec: &str) -> Option<Rgb> {
    if let Some(body) = spec.strip_prefix("rgb:") {
        let mut parts = body.split('/');
        let r = scale_channel(parts.next()?)?;
        let g = scale_channel(parts.next()?)?;
        let b = scale_channel(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        return Some((r, g, b));
    }
    if let Some(body) = spec.strip_prefix('#') {
        let len = body.len();
        if len % 3 != 0 || len == 0 || len > 12 {
            return None;
        }
        let per = len / 3;
        let r = scale_channel(&body[..per])?;
        let g = scale_channel(&body[per..2 * per])?;
        let b = scale_channel(&body[2 * per..])?;
        return Some((r, g, b));
    }
    None
}

/// Scale a 1-4 hex digit channel to 8 bits.
fn scale_channel(digits: &str) -> Option<u8> {
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    let value = u32::from_str_radix(digits, 16).ok()?;
    let max = (1u32 << (4 * digits.len() as u32)) - 1;
    Some(((value * 255 + max / 2) / max) as u8)
}

/// Format a color the way xterm answers queries: `rgb:rrrr/gggg/bbbb`.
#[must_use]
pub fn format_color_query(rgb: Rgb) -> String {
    // Replicate each 8-bit channel into 16 bits.
    let scale = |c: u8| u32::from(c) * 0x101;
    format!(
        "rgb:{:04x}/{:04x}/{:04x}",
        scale(rgb.0),
        scale(rgb.1),
        scale(rgb.2)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_palette_matches_xterm_anchors() {
        assert_eq!(default_palette_color(0), (0, 0, 0));
        assert_eq!(default_palette_color(1), (205, 0, 0));
        assert_eq!(default_palette_color(15), (255, 255, 255));
        assert_eq!(default_palette_color(196), (255, 0, 0));
        assert_eq!(default_palette_color(232), (8, 8, 8));
        assert_eq!(default_palette_color(255), (238, 238, 238));
    }

    #[test]
    fn set_and_reset_entry() {
        let mut palette = ColorPalette::new();
        palette.set(1, (1, 2, 3));
        assert_eq!(palette.get(1), (1, 2, 3));
        palette.reset(1);
        assert_eq!(palette.get(1), (205, 0, 0));
    }

    #[test]
    fn parse_rgb_spec_forms() {
        assert_eq!(parse_color_spec("rgb:ff/00/80"), Some((255, 0, 128)));
        assert_eq!(parse_color_spec("rgb:ffff/0000/8080"), Some((255, 0, 128)));
        assert_eq!(parse_color_spec("rgb:f/0/8"), Some((255, 0, 136)));
        assert_eq!(parse_color_spec("#ff0080"), Some((255, 0, 128)));
        assert_eq!(parse_color_spec("#f08"), Some((255, 0, 136)));
        assert_eq!(parse_color_spec("notacolor"), None);
        assert_eq!(parse_color_spec("rgb:ff/00"), None);
    }

    #[test]
    fn query_format_is_16_bit() {
        assert_eq!(format_color_query((255, 0, 128)), "rgb:ffff/0000/8080");
    }
}
