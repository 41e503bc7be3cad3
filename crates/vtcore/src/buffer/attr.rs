//! Packed SGR attribute words.
//!
//! A cell's style lives in two 32-bit words with fixed bit positions; SGR
//! state round-trips through these words, so the layout is part of the
//! public contract:
//!
//! ```text
//! fg: | STRIKE INVIS BLINK UNDERLINE BOLD INVERSE | CM(2) | color(24) |
//!     | 31     30    29    28        27   26      | 25-24 | 23-0      |
//! bg: | -      OVERLINE PROTECTED EXT ITALIC DIM  | CM(2) | color(24) |
//!     | 31     30       29        28  27     26?  |       |           |
//! ```
//!
//! (bg flag bits: ITALIC 26, DIM 27, HAS_EXTENDED 28, PROTECTED 29,
//! OVERLINE 30.) The color field holds a palette index in the low 8 bits or
//! a packed RGB value in all 24, selected by the 2-bit color mode.
//!
//! Rarely-used attributes (underline style/color, hyperlinks) live in
//! [`ExtendedAttrs`] records shared by reference across runs of cells and
//! detached copy-on-write before any mutation.

use std::sync::Arc;

/// Content word layout (the third cell word, kept here with its siblings).
pub mod content {
    /// Bits 0-20: Unicode code point (0 when the combined flag is set).
    pub const CODEPOINT_MASK: u32 = 0x001F_FFFF;
    /// Bit 21: text lives in the line's combined side table.
    pub const IS_COMBINED: u32 = 1 << 21;
    /// Bits 22-23: display width (0 = wide continuation, 1, 2).
    pub const WIDTH_SHIFT: u32 = 22;
    /// Mask for the width field.
    pub const WIDTH_MASK: u32 = 0b11 << WIDTH_SHIFT;
}

/// Flag bits in the foreground word.
pub mod fg_flags {
    /// Swap foreground and background at render time.
    pub const INVERSE: u32 = 1 << 26;
    pub const BOLD: u32 = 1 << 27;
    /// An underline is present; its style lives in the extended record.
    pub const UNDERLINE: u32 = 1 << 28;
    pub const BLINK: u32 = 1 << 29;
    pub const INVISIBLE: u32 = 1 << 30;
    pub const STRIKETHROUGH: u32 = 1 << 31;
    /// All foreground flag bits.
    pub const ALL: u32 = INVERSE | BOLD | UNDERLINE | BLINK | INVISIBLE | STRIKETHROUGH;
}

/// Flag bits in the background word.
pub mod bg_flags {
    pub const ITALIC: u32 = 1 << 26;
    pub const DIM: u32 = 1 << 27;
    /// An [`super::ExtendedAttrs`](ExtendedAttrs) record is attached.
    pub const HAS_EXTENDED: u32 = 1 << 28;
    /// DECSCA protected: selective erase leaves this cell alone.
    pub const PROTECTED: u32 = 1 << 29;
    pub const OVERLINE: u32 = 1 << 30;
    /// All background flag bits.
    pub const ALL: u32 = ITALIC | DIM | HAS_EXTENDED | PROTECTED | OVERLINE;
}

/// Color mode and value fields, identical in both words.
pub mod color {
    /// Bits 24-25: color mode.
    pub const CM_MASK: u32 = 0b11 << 24;
    /// Terminal default color.
    pub const CM_DEFAULT: u32 = 0;
    /// Palette entry 0-15 (set via SGR 30-37/90-97 and friends).
    pub const CM_P16: u32 = 1 << 24;
    /// Palette entry 0-255 (SGR 38;5).
    pub const CM_P256: u32 = 2 << 24;
    /// Direct 24-bit color (SGR 38;2).
    pub const CM_RGB: u32 = 3 << 24;
    /// Bits 0-23: palette index or packed RGB.
    pub const COLOR_MASK: u32 = 0x00FF_FFFF;
}

/// Underline style stored in [`ExtendedAttrs`] (SGR 4:0 — 4:5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum UnderlineStyle {
    #[default]
    None = 0,
    Single = 1,
    Double = 2,
    Curly = 3,
    Dotted = 4,
    Dashed = 5,
}

impl UnderlineStyle {
    /// Map an SGR 4:x sub-parameter; out-of-range styles fall back to single.
    #[must_use]
    pub fn from_param(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Single,
            2 => Self::Double,
            3 => Self::Curly,
            4 => Self::Dotted,
            5 => Self::Dashed,
            _ => Self::Single,
        }
    }
}

/// Rarely-used attributes attached to a cell via the background word's
/// HAS_EXTENDED bit.
///
/// One record may be shared by a run of cells; any mutation must go through
/// a copy-on-write detach (`Arc::make_mut`) so a later SGR change never
/// retroactively restyles earlier cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedAttrs {
    /// Underline style; [`UnderlineStyle::None`] renders a plain underline
    /// when the UNDERLINE flag is set without a style.
    pub underline_style: UnderlineStyle,
    /// Underline color in fg/bg word encoding (mode + value);
    /// `CM_DEFAULT` follows the foreground color.
    pub underline_color: u32,
    /// OSC 8 hyperlink id (0 = none).
    pub url_id: u32,
    /// Vertical offset adjustment for dashed/dotted underline rendering.
    pub underline_variant_offset: u8,
}

impl ExtendedAttrs {
    /// True when nothing in the record differs from the default rendering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.underline_style == UnderlineStyle::None && self.underline_color == 0 && self.url_id == 0
    }
}

/// The SGR state applied to subsequently printed cells: two packed words
/// plus the shared extended record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeData {
    /// Foreground word.
    pub fg: u32,
    /// Background word.
    pub bg: u32,
    /// Extended attributes (present only when `bg & HAS_EXTENDED != 0`).
    pub extended: Option<Arc<ExtendedAttrs>>,
}

impl AttributeData {
    /// Fresh default attributes (SGR 0 bit pattern).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- foreground flags ------------------------------------------------

    #[must_use]
    pub fn is_inverse(&self) -> bool {
        self.fg & fg_flags::INVERSE != 0
    }
    #[must_use]
    pub fn is_bold(&self) -> bool {
        self.fg & fg_flags::BOLD != 0
    }
    #[must_use]
    pub fn is_underline(&self) -> bool {
        self.fg & fg_flags::UNDERLINE != 0
    }
    #[must_use]
    pub fn is_blink(&self) -> bool {
        self.fg & fg_flags::BLINK != 0
    }
    #[must_use]
    pub fn is_invisible(&self) -> bool {
        self.fg & fg_flags::INVISIBLE != 0
    }
    #[must_use]
    pub fn is_strikethrough(&self) -> bool {
        self.fg & fg_flags::STRIKETHROUGH != 0
    }

    // -- background flags ------------------------------------------------

    #[must_use]
    pub fn is_italic(&self) -> bool {
        self.bg & bg_flags::ITALIC != 0
    }
    #[must_use]
    pub fn is_dim(&self) -> bool {
        self.bg & bg_flags::DIM != 0
    }
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.bg & bg_flags::PROTECTED != 0
    }
    #[must_use]
    pub fn is_overline(&self) -> bool {
        self.bg & bg_flags::OVERLINE != 0
    }
    #[must_use]
    pub fn has_extended(&self) -> bool {
        self.bg & bg_flags::HAS_EXTENDED != 0
    }

    // -- colors ----------------------------------------------------------

    #[must_use]
    pub fn fg_color_mode(&self) -> u32 {
        self.fg & color::CM_MASK
    }
    #[must_use]
    pub fn bg_color_mode(&self) -> u32 {
        self.bg & color::CM_MASK
    }
    #[must_use]
    pub fn is_fg_default(&self) -> bool {
        self.fg_color_mode() == color::CM_DEFAULT
    }
    #[must_use]
    pub fn is_bg_default(&self) -> bool {
        self.bg_color_mode() == color::CM_DEFAULT
    }
    #[must_use]
    pub fn is_fg_rgb(&self) -> bool {
        self.fg_color_mode() == color::CM_RGB
    }
    #[must_use]
    pub fn is_bg_rgb(&self) -> bool {
        self.bg_color_mode() == color::CM_RGB
    }
    #[must_use]
    pub fn is_fg_palette(&self) -> bool {
        matches!(self.fg_color_mode(), color::CM_P16 | color::CM_P256)
    }
    #[must_use]
    pub fn is_bg_palette(&self) -> bool {
        matches!(self.bg_color_mode(), color::CM_P16 | color::CM_P256)
    }

    /// Palette index or packed RGB, depending on the mode.
    #[must_use]
    pub fn fg_color(&self) -> u32 {
        self.fg & color::COLOR_MASK
    }
    /// Palette index or packed RGB, depending on the mode.
    #[must_use]
    pub fn bg_color(&self) -> u32 {
        self.bg & color::COLOR_MASK
    }

    /// Foreground RGB components (only meaningful in RGB mode).
    #[must_use]
    pub fn fg_rgb(&self) -> (u8, u8, u8) {
        unpack_rgb(self.fg_color())
    }
    /// Background RGB components (only meaningful in RGB mode).
    #[must_use]
    pub fn bg_rgb(&self) -> (u8, u8, u8) {
        unpack_rgb(self.bg_color())
    }

    pub fn set_fg_default(&mut self) {
        self.fg &= !(color::CM_MASK | color::COLOR_MASK);
    }
    pub fn set_bg_default(&mut self) {
        self.bg &= !(color::CM_MASK | color::COLOR_MASK);
    }

    /// Select a 16-color palette foreground (SGR 30-37/90-97).
    pub fn set_fg_p16(&mut self, index: u8) {
        self.fg = (self.fg & !(color::CM_MASK | color::COLOR_MASK))
            | color::CM_P16
            | u32::from(index);
    }
    /// Select a 16-color palette background (SGR 40-47/100-107).
    pub fn set_bg_p16(&mut self, index: u8) {
        self.bg = (self.bg & !(color::CM_MASK | color::COLOR_MASK))
            | color::CM_P16
            | u32::from(index);
    }
    /// Select a 256-color palette foreground (SGR 38;5).
    pub fn set_fg_p256(&mut self, index: u8) {
        self.fg = (self.fg & !(color::CM_MASK | color::COLOR_MASK))
            | color::CM_P256
            | u32::from(index);
    }
    /// Select a 256-color palette background (SGR 48;5).
    pub fn set_bg_p256(&mut self, index: u8) {
        self.bg = (self.bg & !(color::CM_MASK | color::COLOR_MASK))
            | color::CM_P256
            | u32::from(index);
    }
    /// Select a direct-color foreground (SGR 38;2).
    pub fn set_fg_rgb(&mut self, r: u8, g: u8, b: u8) {
        self.fg =
            (self.fg & !(color::CM_MASK | color::COLOR_MASK)) | color::CM_RGB | pack_rgb(r, g, b);
    }
    /// Select a direct-color background (SGR 48;2).
    pub fn set_bg_rgb(&mut self, r: u8, g: u8, b: u8) {
        self.bg =
            (self.bg & !(color::CM_MASK | color::COLOR_MASK)) | color::CM_RGB | pack_rgb(r, g, b);
    }

    // -- extended attributes ---------------------------------------------

    /// Mutable access to the extended record, detaching shared state first
    /// (copy-on-write) and creating the record if absent.
    pub fn extended_mut(&mut self) -> &mut ExtendedAttrs {
        self.bg |= bg_flags::HAS_EXTENDED;
        Arc::make_mut(self.extended.get_or_insert_with(Arc::default))
    }

    /// Drop the extended record if nothing in it matters anymore.
    pub fn prune_extended(&mut self) {
        if self.extended.as_ref().is_some_and(|e| e.is_empty()) {
            self.extended = None;
            self.bg &= !bg_flags::HAS_EXTENDED;
        }
    }

    /// Underline style, resolving the plain UNDERLINE flag to single.
    #[must_use]
    pub fn underline_style(&self) -> UnderlineStyle {
        match &self.extended {
            Some(e) if self.has_extended() && e.underline_style != UnderlineStyle::None => {
                e.underline_style
            }
            _ if self.is_underline() => UnderlineStyle::Single,
            _ => UnderlineStyle::None,
        }
    }

    /// OSC 8 hyperlink id stamped on this attribute (0 = none).
    #[must_use]
    pub fn url_id(&self) -> u32 {
        match &self.extended {
            Some(e) if self.has_extended() => e.url_id,
            _ => 0,
        }
    }
}

/// Pack RGB components into the low 24 bits.
#[inline]
#[must_use]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b)
}

/// Unpack the low 24 bits into RGB components.
#[inline]
#[must_use]
pub fn unpack_rgb(value: u32) -> (u8, u8, u8) {
    (
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_zero_words() {
        let attr = AttributeData::new();
        assert_eq!(attr.fg, 0);
        assert_eq!(attr.bg, 0);
        assert!(attr.extended.is_none());
    }

    #[test]
    fn flag_bits_match_contract() {
        assert_eq!(fg_flags::INVERSE, 0x0400_0000);
        assert_eq!(fg_flags::BOLD, 0x0800_0000);
        assert_eq!(fg_flags::UNDERLINE, 0x1000_0000);
        assert_eq!(fg_flags::BLINK, 0x2000_0000);
        assert_eq!(fg_flags::INVISIBLE, 0x4000_0000);
        assert_eq!(fg_flags::STRIKETHROUGH, 0x8000_0000);
        assert_eq!(bg_flags::HAS_EXTENDED, 0x1000_0000);
        assert_eq!(color::CM_RGB, 0x0300_0000);
    }

    #[test]
    fn palette_color_round_trip() {
        let mut attr = AttributeData::new();
        attr.set_fg_p16(1);
        assert!(attr.is_fg_palette());
        assert_eq!(attr.fg_color(), 1);
        attr.set_fg_p256(196);
        assert_eq!(attr.fg_color(), 196);
        attr.set_fg_default();
        assert!(attr.is_fg_default());
        assert_eq!(attr.fg_color(), 0);
    }

    #[test]
    fn rgb_round_trip_preserves_flags() {
        let mut attr = AttributeData::new();
        attr.fg |= fg_flags::BOLD;
        attr.set_fg_rgb(255, 128, 64);
        assert!(attr.is_bold());
        assert!(attr.is_fg_rgb());
        assert_eq!(attr.fg_rgb(), (255, 128, 64));
    }

    #[test]
    fn extended_mut_detaches_shared_record() {
        let mut a = AttributeData::new();
        a.extended_mut().underline_style = UnderlineStyle::Curly;
        let mut b = a.clone();
        assert!(Arc::ptr_eq(
            a.extended.as_ref().unwrap(),
            b.extended.as_ref().unwrap()
        ));

        b.extended_mut().underline_style = UnderlineStyle::Dotted;
        assert_eq!(
            a.extended.as_ref().unwrap().underline_style,
            UnderlineStyle::Curly
        );
        assert_eq!(
            b.extended.as_ref().unwrap().underline_style,
            UnderlineStyle::Dotted
        );
    }

    #[test]
    fn prune_extended_clears_flag() {
        let mut attr = AttributeData::new();
        attr.extended_mut().url_id = 7;
        attr.extended_mut().url_id = 0;
        attr.prune_extended();
        assert!(!attr.has_extended());
        assert!(attr.extended.is_none());
    }

    #[test]
    fn underline_style_resolution() {
        let mut attr = AttributeData::new();
        assert_eq!(attr.underline_style(), UnderlineStyle::None);
        attr.fg |= fg_flags::UNDERLINE;
        assert_eq!(attr.underline_style(), UnderlineStyle::Single);
        attr.extended_mut().underline_style = UnderlineStyle::Dashed;
        assert_eq!(attr.underline_style(), UnderlineStyle::Dashed);
    }
}
