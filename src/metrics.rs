//! Font metric extraction. Parses a TrueType/OpenType face once and
//! produces the width/metric tables the font emitters consume; glyph
//! outlines are never touched here.

use crate::error::QuireError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First character code covered by the simple-font `/Widths` array.
pub(crate) const FIRST_CHAR: u8 = 32;
/// Last character code covered by the simple-font `/Widths` array.
pub(crate) const LAST_CHAR: u8 = 255;

/// Parsed metrics for one font program, scaled to 1000 units per em.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontMetrics {
    pub base_name: String,
    /// Widths for codes 32..=255, for simple Type1/TrueType fonts.
    pub widths: Vec<u16>,
    /// Width per Unicode codepoint, for composite subsets.
    pub char_widths: BTreeMap<u32, u16>,
    /// Glyph id per Unicode codepoint, for the CIDToGIDMap.
    pub glyph_ids: BTreeMap<u32, u16>,
    pub ascent: i16,
    pub descent: i16,
    pub cap_height: i16,
    pub italic_angle: i16,
    pub stem_v: i16,
    pub bbox: (i16, i16, i16, i16),
    pub missing_width: u16,
    pub default_width: u16,
    pub is_fixed_pitch: bool,
    pub symbolic: bool,
}

impl FontMetrics {
    pub fn from_font_data(data: &[u8]) -> Result<Self, QuireError> {
        let face = ttf_parser::Face::parse(data, 0)
            .map_err(|err| QuireError::Font(format!("unreadable font program: {}", err)))?;
        Ok(Self::from_face(&face))
    }

    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let (symbolic, symbol_subtable) = select_symbol_subtable(face);

        let mut char_widths = BTreeMap::new();
        let mut glyph_ids = BTreeMap::new();
        for_each_mapped_codepoint(face, |code| {
            if let Some(gid) = glyph_index_for_codepoint(face, code, symbol_subtable) {
                let advance = face.glyph_hor_advance(gid).unwrap_or(0);
                char_widths.insert(code, scale_u16(advance, scale));
                glyph_ids.insert(code, gid.0);
            }
        });

        let mut widths = Vec::with_capacity((LAST_CHAR - FIRST_CHAR + 1) as usize);
        for code in FIRST_CHAR..=LAST_CHAR {
            widths.push(char_widths.get(&(code as u32)).copied().unwrap_or(0));
        }
        let missing_width = char_widths.get(&(b' ' as u32)).copied().unwrap_or(0);
        let default_width = if missing_width > 0 { missing_width } else { 600 };

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);

        FontMetrics {
            base_name: postscript_name(face),
            widths,
            char_widths,
            glyph_ids,
            ascent,
            descent,
            cap_height,
            italic_angle,
            // ttf tables carry no usable stem width; a fixed estimate is
            // what viewers get.
            stem_v: 80,
            bbox,
            missing_width,
            default_width,
            is_fixed_pitch: face.is_monospaced(),
            symbolic,
        }
    }

    /// FontDescriptor /Flags: bit 1 fixed-pitch, bit 3 symbolic, bit 6
    /// non-symbolic.
    pub(crate) fn descriptor_flags(&self) -> u32 {
        let mut flags = if self.symbolic { 4 } else { 32 };
        if self.is_fixed_pitch {
            flags |= 1;
        }
        flags
    }
}

fn for_each_mapped_codepoint(face: &ttf_parser::Face<'_>, mut visit: impl FnMut(u32)) {
    let Some(cmap) = face.tables().cmap else {
        return;
    };
    let mut seen = std::collections::BTreeSet::new();
    for subtable in cmap.subtables {
        if !subtable.is_unicode()
            && !(subtable.platform_id == ttf_parser::name::PlatformId::Windows
                && subtable.encoding_id == 0)
        {
            continue;
        }
        subtable.codepoints(|code| {
            if seen.insert(code) {
                visit(code);
            }
        });
    }
}

fn select_symbol_subtable<'a>(
    face: &'a ttf_parser::Face<'a>,
) -> (bool, Option<ttf_parser::cmap::Subtable<'a>>) {
    let Some(cmap) = face.tables().cmap else {
        return (false, None);
    };
    let mut first = None;
    let mut symbol = None;
    let mut has_unicode = false;
    for subtable in cmap.subtables {
        if first.is_none() {
            first = Some(subtable);
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            symbol = Some(subtable);
        }
        if subtable.is_unicode() {
            has_unicode = true;
        }
    }
    if has_unicode {
        (false, None)
    } else {
        (symbol.is_some(), symbol.or(first))
    }
}

fn glyph_index_for_codepoint<'a>(
    face: &'a ttf_parser::Face<'a>,
    codepoint: u32,
    fallback: Option<ttf_parser::cmap::Subtable<'a>>,
) -> Option<ttf_parser::GlyphId> {
    if let Some(ch) = char::from_u32(codepoint) {
        if let Some(id) = face.glyph_index(ch) {
            return Some(id);
        }
    }
    if let Some(subtable) = fallback {
        if let Some(id) = subtable.glyph_index(codepoint) {
            return Some(id);
        }
        // Symbol cmaps commonly remap ASCII into the F0xx private range.
        return subtable.glyph_index(codepoint + 0xF000);
    }
    None
}

fn postscript_name(face: &ttf_parser::Face<'_>) -> String {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }
    post.or(full)
        .or(family)
        .unwrap_or_else(|| "EmbeddedFont".to_string())
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn scale_u16(value: u16, scale: f32) -> u16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(0, u16::MAX as i32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_flags_are_exclusive() {
        let mut metrics = FontMetrics {
            base_name: "Test".to_string(),
            widths: vec![0; 224],
            char_widths: BTreeMap::new(),
            glyph_ids: BTreeMap::new(),
            ascent: 800,
            descent: -200,
            cap_height: 700,
            italic_angle: 0,
            stem_v: 80,
            bbox: (0, -200, 1000, 900),
            missing_width: 500,
            default_width: 500,
            is_fixed_pitch: false,
            symbolic: false,
        };
        assert_eq!(metrics.descriptor_flags(), 32);
        metrics.symbolic = true;
        metrics.is_fixed_pitch = true;
        assert_eq!(metrics.descriptor_flags(), 4 | 1);
    }

    #[test]
    fn metrics_survive_json_round_trip() {
        let mut char_widths = BTreeMap::new();
        char_widths.insert(65u32, 722u16);
        let metrics = FontMetrics {
            base_name: "RoundTrip".to_string(),
            widths: vec![500; 224],
            char_widths,
            glyph_ids: BTreeMap::new(),
            ascent: 750,
            descent: -250,
            cap_height: 700,
            italic_angle: -12,
            stem_v: 80,
            bbox: (-100, -250, 1100, 950),
            missing_width: 500,
            default_width: 500,
            is_fixed_pitch: false,
            symbolic: false,
        };
        let text = serde_json::to_string(&metrics).unwrap();
        let back: FontMetrics = serde_json::from_str(&text).unwrap();
        assert_eq!(back.base_name, "RoundTrip");
        assert_eq!(back.char_widths.get(&65), Some(&722));
        assert_eq!(back.italic_angle, -12);
    }
}
