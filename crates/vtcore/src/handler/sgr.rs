//! SGR (Select Graphic Rendition) decoding.
//!
//! Applies SGR parameter lists to an [`AttributeData`]. Extended colors
//! accept both the legacy semicolon form (`38;5;196`, `38;2;r;g;b`) and the
//! colon sub-parameter form (`38:5:196`, `38:2::r:g:b`); underline styles
//! come in as `4:0` through `4:5`.

use crate::buffer::attr::{bg_flags, color, fg_flags, AttributeData, UnderlineStyle};
use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Fg,
    Bg,
    Underline,
}

/// Apply one SGR sequence to `attr`.
pub(super) fn apply_sgr(attr: &mut AttributeData, params: &Params) {
    if params.is_empty() {
        *attr = AttributeData::default();
        return;
    }
    let values = params.as_slice();
    let mut i = 0;
    while i < values.len() {
        if params.is_sub(i) {
            // Stray sub-parameter of something we did not consume.
            i += 1;
            continue;
        }
        let p = values[i];
        match p {
            0 => *attr = AttributeData::default(),
            1 => attr.fg |= fg_flags::BOLD,
            2 => attr.bg |= bg_flags::DIM,
            3 => attr.bg |= bg_flags::ITALIC,
            4 => {
                let style = if i + 1 < values.len() && params.is_sub(i + 1) {
                    UnderlineStyle::from_param(values[i + 1])
                } else {
                    UnderlineStyle::Single
                };
                set_underline(attr, style);
            }
            5 | 6 => attr.fg |= fg_flags::BLINK,
            7 => attr.fg |= fg_flags::INVERSE,
            8 => attr.fg |= fg_flags::INVISIBLE,
            9 => attr.fg |= fg_flags::STRIKETHROUGH,
            21 => set_underline(attr, UnderlineStyle::Double),
            22 => {
                attr.fg &= !fg_flags::BOLD;
                attr.bg &= !bg_flags::DIM;
            }
            23 => attr.bg &= !bg_flags::ITALIC,
            24 => set_underline(attr, UnderlineStyle::None),
            25 => attr.fg &= !fg_flags::BLINK,
            27 => attr.fg &= !fg_flags::INVERSE,
            28 => attr.fg &= !fg_flags::INVISIBLE,
            29 => attr.fg &= !fg_flags::STRIKETHROUGH,
            30..=37 => attr.set_fg_p16((p - 30) as u8),
            38 => i += apply_extended_color(attr, params, i, Target::Fg),
            39 => attr.set_fg_default(),
            40..=47 => attr.set_bg_p16((p - 40) as u8),
            48 => i += apply_extended_color(attr, params, i, Target::Bg),
            49 => attr.set_bg_default(),
            53 => attr.bg |= bg_flags::OVERLINE,
            55 => attr.bg &= !bg_flags::OVERLINE,
            58 => i += apply_extended_color(attr, params, i, Target::Underline),
            59 => {
                if attr.extended.is_some() {
                    attr.extended_mut().underline_color = 0;
                    attr.prune_extended();
                }
            }
            90..=97 => attr.set_fg_p16((p - 90 + 8) as u8),
            100..=107 => attr.set_bg_p16((p - 100 + 8) as u8),
            _ => tracing::debug!(param = p, "unhandled SGR parameter"),
        }
        i += 1;
        while i < values.len() && params.is_sub(i) {
            i += 1;
        }
    }
}

fn set_underline(attr: &mut AttributeData, style: UnderlineStyle) {
    if style == UnderlineStyle::None {
        attr.fg &= !fg_flags::UNDERLINE;
        if attr.extended.is_some() {
            attr.extended_mut().underline_style = UnderlineStyle::None;
            attr.prune_extended();
        }
    } else {
        attr.fg |= fg_flags::UNDERLINE;
        // A plain single underline needs no extended record; richer styles
        // (or an already-attached record) store the style explicitly.
        if style != UnderlineStyle::Single || attr.extended.is_some() {
            attr.extended_mut().underline_style = style;
        }
    }
}

/// Decode the color arguments of SGR 38/48/58.
///
/// Returns how many *top-level* parameters were consumed beyond the
/// introducer (colon forms consume none; their sub-parameters are skipped
/// by the caller).
fn apply_extended_color(
    attr: &mut AttributeData,
    params: &Params,
    i: usize,
    target: Target,
) -> usize {
    let values = params.as_slice();
    let colon = i + 1 < values.len() && params.is_sub(i + 1);

    let (mode, spec, consumed): (u16, Vec<u16>, usize) = if colon {
        let mut j = i + 1;
        while j < values.len() && params.is_sub(j) {
            j += 1;
        }
        let sub = &values[i + 1..j];
        if sub.is_empty() {
            return 0;
        }
        (sub[0], sub[1..].to_vec(), 0)
    } else {
        let Some(&mode) = values.get(i + 1) else {
            return 0;
        };
        match mode {
            5 => {
                let spec = values.get(i + 2).copied().into_iter().collect();
                (5, spec, 2)
            }
            2 => {
                let spec = values[values.len().min(i + 2)..values.len().min(i + 5)].to_vec();
                (2, spec, 4)
            }
            _ => (mode, Vec::new(), 1),
        }
    };

    match mode {
        5 => {
            if let Some(&index) = spec.first() {
                apply_color(attr, target, ColorValue::Palette(index.min(255) as u8));
            }
        }
        2 => {
            // `38:2:r:g:b` or `38:2:<colorspace>:r:g:b`; the last three
            // values are the channels.
            let rgb: Vec<u16> = if colon && spec.len() >= 4 {
                spec[spec.len() - 3..].to_vec()
            } else {
                spec
            };
            if rgb.len() >= 3 {
                let c = (
                    rgb[0].min(255) as u8,
                    rgb[1].min(255) as u8,
                    rgb[2].min(255) as u8,
                );
                apply_color(attr, target, ColorValue::Rgb(c));
            }
        }
        _ => tracing::debug!(mode, "unhandled extended color mode"),
    }
    consumed
}

enum ColorValue {
    Palette(u8),
    Rgb((u8, u8, u8)),
}

fn apply_color(attr: &mut AttributeData, target: Target, value: ColorValue) {
    match (target, value) {
        (Target::Fg, ColorValue::Palette(i)) => attr.set_fg_p256(i),
        (Target::Fg, ColorValue::Rgb((r, g, b))) => attr.set_fg_rgb(r, g, b),
        (Target::Bg, ColorValue::Palette(i)) => attr.set_bg_p256(i),
        (Target::Bg, ColorValue::Rgb((r, g, b))) => attr.set_bg_rgb(r, g, b),
        (Target::Underline, ColorValue::Palette(i)) => {
            attr.extended_mut().underline_color = color::CM_P256 | u32::from(i);
        }
        (Target::Underline, ColorValue::Rgb((r, g, b))) => {
            attr.extended_mut().underline_color =
                color::CM_RGB | crate::buffer::attr::pack_rgb(r, g, b);
        }
    }
}
