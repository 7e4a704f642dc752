//! Font resources and their object emission: core fonts, simple
//! Type1/TrueType fonts with a 224-entry `/Widths` array, and composite
//! Identity-H subsets with a compacted CID `/W` table.

use crate::buffer::ObjectBuffer;
use crate::error::QuireError;
use crate::metrics::{FIRST_CHAR, FontMetrics, LAST_CHAR};
use crate::syntax::{flate_compress, sanitize_font_name};
use std::collections::{BTreeMap, BTreeSet};

/// The closed set of supported font kinds. Anything else is rejected when
/// the resource is registered, never discovered at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontVariant {
    Core,
    Type1,
    TrueType,
    TtfSubset,
}

impl FontVariant {
    pub fn from_name(name: &str) -> Result<Self, QuireError> {
        match name.to_ascii_lowercase().as_str() {
            "core" => Ok(FontVariant::Core),
            "type1" => Ok(FontVariant::Type1),
            "truetype" => Ok(FontVariant::TrueType),
            "ttf-subset" | "ttfsubset" => Ok(FontVariant::TtfSubset),
            other => Err(QuireError::Font(format!("unknown font variant: {}", other))),
        }
    }
}

/// One registered font, keyed by family+style, emitted exactly once.
pub(crate) struct FontResource {
    pub(crate) key: String,
    pub(crate) index: usize,
    pub(crate) variant: FontVariant,
    pub(crate) base_font: String,
    pub(crate) metrics: Option<FontMetrics>,
    /// `/Differences` body, shared across fonts with an identical table.
    pub(crate) encoding_diff: Option<String>,
    pub(crate) font_file: Option<Vec<u8>>,
    /// Codepoints observed in use, for subset width/CID tables.
    pub(crate) used_codes: BTreeSet<u32>,
    pub(crate) object_id: usize,
}

impl FontResource {
    pub(crate) fn core(key: String, index: usize, name: &str) -> Result<Self, QuireError> {
        let base_font = core_base_font(name)
            .ok_or_else(|| QuireError::Font(format!("not a core font: {}", name)))?;
        Ok(FontResource {
            key,
            index,
            variant: FontVariant::Core,
            base_font: base_font.to_string(),
            metrics: None,
            encoding_diff: None,
            font_file: None,
            used_codes: BTreeSet::new(),
            object_id: 0,
        })
    }

    pub(crate) fn simple(
        key: String,
        index: usize,
        variant: FontVariant,
        metrics: FontMetrics,
        encoding_diff: Option<String>,
        font_file: Option<Vec<u8>>,
    ) -> Result<Self, QuireError> {
        match variant {
            FontVariant::Type1 | FontVariant::TrueType => {}
            _ => {
                return Err(QuireError::Font(format!(
                    "font {} registered as simple with a non-simple variant",
                    key
                )));
            }
        }
        let base_font = sanitize_font_name(&metrics.base_name);
        Ok(FontResource {
            key,
            index,
            variant,
            base_font,
            metrics: Some(metrics),
            encoding_diff,
            font_file,
            used_codes: BTreeSet::new(),
            object_id: 0,
        })
    }

    pub(crate) fn subset(
        key: String,
        index: usize,
        metrics: FontMetrics,
        font_file: Vec<u8>,
    ) -> Self {
        let base_font = sanitize_font_name(&metrics.base_name);
        FontResource {
            key,
            index,
            variant: FontVariant::TtfSubset,
            base_font,
            metrics: Some(metrics),
            encoding_diff: None,
            font_file: Some(font_file),
            used_codes: BTreeSet::new(),
            object_id: 0,
        }
    }

    pub(crate) fn resource_name(&self) -> String {
        format!("F{}", self.index)
    }

    pub(crate) fn note_text(&mut self, text: &str) {
        for ch in text.chars() {
            self.used_codes.insert(ch as u32);
        }
    }

    /// Emits every object for this font and returns the id of the font
    /// dictionary the page resources reference.
    pub(crate) fn emit(
        &mut self,
        buf: &mut ObjectBuffer,
        compress: bool,
        diff_objects: &mut BTreeMap<String, usize>,
    ) -> Result<usize, QuireError> {
        let id = match self.variant {
            FontVariant::Core => self.emit_core(buf)?,
            FontVariant::Type1 | FontVariant::TrueType => self.emit_simple(buf, diff_objects)?,
            FontVariant::TtfSubset => self.emit_subset(buf, compress)?,
        };
        self.object_id = id;
        Ok(id)
    }

    fn emit_core(&self, buf: &mut ObjectBuffer) -> Result<usize, QuireError> {
        let id = buf.new_object()?;
        let encoding = if self.base_font == "Symbol" || self.base_font == "ZapfDingbats" {
            String::new()
        } else {
            " /Encoding /WinAnsiEncoding".to_string()
        };
        buf.put_line(&format!(
            "<< /Type /Font /Subtype /Type1 /BaseFont /{}{} >>",
            self.base_font, encoding
        ));
        buf.end_object();
        Ok(id)
    }

    fn emit_simple(
        &self,
        buf: &mut ObjectBuffer,
        diff_objects: &mut BTreeMap<String, usize>,
    ) -> Result<usize, QuireError> {
        let metrics = self.require_metrics()?;

        let encoding = match &self.encoding_diff {
            Some(diff) => {
                let diff_id = match diff_objects.get(diff) {
                    Some(&id) => id,
                    None => {
                        let id = buf.new_object()?;
                        buf.put_line(&format!(
                            "<< /Type /Encoding /BaseEncoding /WinAnsiEncoding /Differences [ {} ] >>",
                            diff
                        ));
                        buf.end_object();
                        diff_objects.insert(diff.clone(), id);
                        id
                    }
                };
                format!("{} 0 R", diff_id)
            }
            None => "/WinAnsiEncoding".to_string(),
        };

        let font_id = buf.reserve(1);
        let descriptor_id = buf.reserve(1);
        let file_id = self.font_file.as_ref().map(|_| buf.reserve(1));

        let subtype = match self.variant {
            FontVariant::Type1 => "Type1",
            _ => "TrueType",
        };
        let widths: Vec<String> = metrics.widths.iter().map(|w| w.to_string()).collect();
        buf.begin_object(font_id)?;
        buf.put_line(&format!(
            "<< /Type /Font /Subtype /{} /BaseFont /{} /FirstChar {} /LastChar {} /Widths [ {} ] /FontDescriptor {} 0 R /Encoding {} >>",
            subtype,
            self.base_font,
            FIRST_CHAR,
            LAST_CHAR,
            widths.join(" "),
            descriptor_id,
            encoding
        ));
        buf.end_object();

        buf.begin_object(descriptor_id)?;
        buf.put_line(&font_descriptor(
            &self.base_font,
            metrics,
            metrics.descriptor_flags(),
            file_id.map(|id| {
                let key = match self.variant {
                    FontVariant::Type1 => "FontFile",
                    _ => "FontFile2",
                };
                (key, id)
            }),
        ));
        buf.end_object();

        if let (Some(data), Some(file_id)) = (&self.font_file, file_id) {
            emit_font_file(buf, file_id, data)?;
        }
        Ok(font_id)
    }

    fn emit_subset(&self, buf: &mut ObjectBuffer, compress: bool) -> Result<usize, QuireError> {
        let metrics = self.require_metrics()?;
        let data = self
            .font_file
            .as_ref()
            .ok_or_else(|| QuireError::Font(format!("subset font {} has no program", self.key)))?;

        let items = collect_cid_widths(&metrics.char_widths, &self.used_codes);
        let ranges = compact_width_ranges(build_width_ranges(&items));
        let w_array = format_w_array(&ranges);

        let file_id = buf.reserve(1);
        let descriptor_id = buf.reserve(1);
        let cid_map_id = buf.reserve(1);
        let cid_font_id = buf.reserve(1);
        let to_unicode_id = buf.reserve(1);
        let type0_id = buf.reserve(1);

        emit_font_file(buf, file_id, data)?;

        // Identity-H viewers reject symbolic descriptors for CID fonts.
        let flags = (metrics.descriptor_flags() & !4) | 32;
        buf.begin_object(descriptor_id)?;
        buf.put_line(&font_descriptor(
            &self.base_font,
            metrics,
            flags,
            Some(("FontFile2", file_id)),
        ));
        buf.end_object();

        buf.begin_object(cid_map_id)?;
        let map = flate_compress(&cid_to_gid_map(&metrics.glyph_ids, &self.used_codes));
        buf.put_stream("/Filter /FlateDecode", &map);

        buf.begin_object(cid_font_id)?;
        buf.put_line(&format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{} /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> /FontDescriptor {} 0 R /DW {} /W [ {} ] /CIDToGIDMap {} 0 R >>",
            self.base_font, descriptor_id, metrics.default_width, w_array, cid_map_id
        ));
        buf.end_object();

        buf.begin_object(to_unicode_id)?;
        let cmap = IDENTITY_TO_UNICODE.as_bytes();
        if compress {
            buf.put_stream("/Filter /FlateDecode", &flate_compress(cmap));
        } else {
            buf.put_stream("", cmap);
        }

        buf.begin_object(type0_id)?;
        buf.put_line(&format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{} /Encoding /Identity-H /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
            self.base_font, cid_font_id, to_unicode_id
        ));
        buf.end_object();
        Ok(type0_id)
    }

    fn require_metrics(&self) -> Result<&FontMetrics, QuireError> {
        self.metrics
            .as_ref()
            .ok_or_else(|| QuireError::Font(format!("font {} has no metrics", self.key)))
    }
}

const IDENTITY_TO_UNICODE: &str = "/CIDInit /ProcSet findresource begin\n\
12 dict begin\n\
begincmap\n\
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
/CMapName /Adobe-Identity-UCS def\n\
/CMapType 2 def\n\
1 begincodespacerange\n\
<0000> <FFFF>\n\
endcodespacerange\n\
1 beginbfrange\n\
<0000> <FFFF> <0000>\n\
endbfrange\n\
endcmap\n\
CMapName currentdict /CMap defineresource pop\n\
end\n\
end";

fn core_base_font(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "courier" => Some("Courier"),
        "courier-bold" | "courierb" => Some("Courier-Bold"),
        "courier-oblique" | "courieri" => Some("Courier-Oblique"),
        "courier-boldoblique" | "courierbi" => Some("Courier-BoldOblique"),
        "helvetica" | "arial" => Some("Helvetica"),
        "helvetica-bold" | "helveticab" => Some("Helvetica-Bold"),
        "helvetica-oblique" | "helveticai" => Some("Helvetica-Oblique"),
        "helvetica-boldoblique" | "helveticabi" => Some("Helvetica-BoldOblique"),
        "times" | "times-roman" => Some("Times-Roman"),
        "times-bold" | "timesb" => Some("Times-Bold"),
        "times-italic" | "timesi" => Some("Times-Italic"),
        "times-bolditalic" | "timesbi" => Some("Times-BoldItalic"),
        "symbol" => Some("Symbol"),
        "zapfdingbats" => Some("ZapfDingbats"),
        _ => None,
    }
}

fn font_descriptor(
    base_font: &str,
    metrics: &FontMetrics,
    flags: u32,
    font_file: Option<(&str, usize)>,
) -> String {
    let (x_min, y_min, x_max, y_max) = metrics.bbox;
    let file_entry = match font_file {
        Some((key, id)) => format!(" /{} {} 0 R", key, id),
        None => String::new(),
    };
    format!(
        "<< /Type /FontDescriptor /FontName /{} /Flags {} /FontBBox [{} {} {} {}] /ItalicAngle {} /Ascent {} /Descent {} /CapHeight {} /StemV {} /MissingWidth {}{} >>",
        base_font,
        flags,
        x_min,
        y_min,
        x_max,
        y_max,
        metrics.italic_angle,
        metrics.ascent,
        metrics.descent,
        metrics.cap_height,
        metrics.stem_v,
        metrics.missing_width,
        file_entry
    )
}

fn emit_font_file(buf: &mut ObjectBuffer, id: usize, data: &[u8]) -> Result<(), QuireError> {
    buf.begin_object(id)?;
    let packed = flate_compress(data);
    buf.put_stream(
        &format!("/Filter /FlateDecode /Length1 {}", data.len()),
        &packed,
    );
    Ok(())
}

/// Two big-endian bytes per CID over the whole 16-bit range; only used
/// codes map to a glyph, everything else stays .notdef.
fn cid_to_gid_map(glyph_ids: &BTreeMap<u32, u16>, used: &BTreeSet<u32>) -> Vec<u8> {
    let mut map = vec![0u8; 2 * 65536];
    for &code in used {
        if code > 0xFFFF {
            continue;
        }
        if let Some(&gid) = glyph_ids.get(&code) {
            let at = 2 * code as usize;
            map[at] = (gid >> 8) as u8;
            map[at + 1] = (gid & 0xFF) as u8;
        }
    }
    map
}

/// One range of the `/W` array: consecutive codes starting at `start`.
/// `run` marks a range built from equal widths, emitted as `start end w`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WidthRange {
    pub(crate) start: u32,
    pub(crate) widths: Vec<u16>,
    pub(crate) run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeState {
    StartingRange,
    ExtendingRun,
}

/// Width stream for the `/W` table: codes 1..=max used, codes past 255
/// only when actually used, zero widths dropped, 65535 standing in for a
/// real width of 0.
pub(crate) fn collect_cid_widths(
    char_widths: &BTreeMap<u32, u16>,
    used: &BTreeSet<u32>,
) -> Vec<(u32, u16)> {
    let Some(&max_code) = used.iter().max() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for code in 1..=max_code {
        if code >= 256 && !used.contains(&code) {
            continue;
        }
        let Some(&width) = char_widths.get(&code) else {
            continue;
        };
        if width == 0 {
            continue;
        }
        let width = if width == 65535 { 0 } else { width };
        out.push((code, width));
    }
    out
}

/// Single online pass with one step of lookback. A repeated width on a
/// contiguous code either extends an equal-width run or splits the last
/// width off into a fresh run; a differing width appends to the open
/// list unless a run was just extended, in which case a new range opens.
pub(crate) fn build_width_ranges(items: &[(u32, u16)]) -> Vec<WidthRange> {
    let mut ranges: Vec<WidthRange> = Vec::new();
    let mut state = MergeState::StartingRange;
    let mut prev: Option<(u32, u16)> = None;

    for &(code, width) in items {
        match prev {
            Some((prev_code, prev_width)) if code == prev_code + 1 => {
                if width == prev_width {
                    if let Some(last) = ranges.pop() {
                        for range in extend_into_run(last, prev_code, width) {
                            ranges.push(range);
                        }
                    }
                    state = MergeState::ExtendingRun;
                } else {
                    match state {
                        MergeState::ExtendingRun => ranges.push(WidthRange {
                            start: code,
                            widths: vec![width],
                            run: false,
                        }),
                        MergeState::StartingRange => {
                            if let Some(last) = ranges.pop() {
                                let mut widths = last.widths;
                                widths.push(width);
                                ranges.push(WidthRange {
                                    start: last.start,
                                    widths,
                                    run: false,
                                });
                            }
                        }
                    }
                    state = MergeState::StartingRange;
                }
            }
            _ => {
                ranges.push(WidthRange {
                    start: code,
                    widths: vec![width],
                    run: false,
                });
                state = MergeState::StartingRange;
            }
        }
        prev = Some((code, width));
    }
    ranges
}

fn extend_into_run(last: WidthRange, prev_code: u32, width: u16) -> Vec<WidthRange> {
    if last.widths.iter().all(|&w| w == width) {
        let mut widths = last.widths;
        widths.push(width);
        return vec![WidthRange {
            start: last.start,
            widths,
            run: true,
        }];
    }
    // The list ends in a single copy of this width; split it off as the
    // seed of a run of two.
    let mut head_widths = last.widths;
    head_widths.pop();
    let tail = WidthRange {
        start: prev_code,
        widths: vec![width, width],
        run: true,
    };
    if head_widths.is_empty() {
        vec![tail]
    } else {
        vec![
            WidthRange {
                start: last.start,
                widths: head_widths,
                run: false,
            },
            tail,
        ]
    }
}

/// Folds short explicit lists into a contiguous explicit predecessor.
/// Runs stay intact on both sides so `start end w` entries keep their
/// exact boundaries.
pub(crate) fn compact_width_ranges(ranges: Vec<WidthRange>) -> Vec<WidthRange> {
    let mut out: Vec<WidthRange> = Vec::new();
    for range in ranges {
        match out.last_mut() {
            Some(prev)
                if !prev.run
                    && !range.run
                    && range.start == prev.start + prev.widths.len() as u32
                    && range.widths.len() < 3 =>
            {
                prev.widths.extend(range.widths);
            }
            _ => out.push(range),
        }
    }
    out
}

pub(crate) fn format_w_array(ranges: &[WidthRange]) -> String {
    let mut parts = Vec::new();
    for range in ranges {
        let first = range.widths.first().copied().unwrap_or(0);
        if range.widths.iter().all(|&w| w == first) {
            parts.push(format!(
                "{} {} {}",
                range.start,
                range.start + range.widths.len() as u32 - 1,
                first
            ));
        } else {
            let widths: Vec<String> = range.widths.iter().map(|w| w.to_string()).collect();
            parts.push(format!("{} [ {} ]", range.start, widths.join(" ")));
        }
    }
    parts.join(" ")
}
