//! Document assembly: page bracketing, resource registration, and the
//! single finalize pass that serializes header, objects, xref and trailer.

use crate::buffer::ObjectBuffer;
use crate::cache::MetricsCache;
use crate::error::QuireError;
use crate::font::{FontResource, FontVariant};
use crate::image::{ImageResource, RawImage};
use crate::metrics::FontMetrics;
use crate::page::{Page, PageLink};
use crate::syntax::{encode_latin1, escape_pdf_string, fmt_pt};
use crate::types::{DocumentInfo, Orientation, PageFormat, PdfVersion, Size, Unit};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const PAGES_ROOT_ID: usize = 1;
pub(crate) const RESOURCES_ID: usize = 2;

/// Lifecycle phases; transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentState {
    Uninitialized,
    Ready,
    GeneratingPage,
    Closed,
}

/// Per-document configuration; one value built up front and threaded into
/// every collaborator.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub format: PageFormat,
    /// Explicit page size in points, overriding `format`.
    pub custom_size: Option<Size>,
    pub orientation: Orientation,
    pub unit: Unit,
    pub compress: bool,
    pub version: PdfVersion,
    /// Token in page content standing in for the final page count.
    pub page_alias: Option<String>,
    pub metrics_cache_dir: Option<PathBuf>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            format: PageFormat::A4,
            custom_size: None,
            orientation: Orientation::Portrait,
            unit: Unit::Mm,
            compress: true,
            version: PdfVersion::V1_3,
            page_alias: Some("{nb}".to_string()),
            metrics_cache_dir: None,
        }
    }
}

impl DocumentConfig {
    /// Builds a configuration from caller-facing names; bad names fail
    /// here, never during serialization.
    pub fn from_names(format: &str, unit: &str, orientation: &str) -> Result<Self, QuireError> {
        Ok(DocumentConfig {
            format: PageFormat::from_name(format)?,
            unit: Unit::from_name(unit)?,
            orientation: Orientation::from_name(orientation)?,
            ..DocumentConfig::default()
        })
    }

    fn default_size(&self) -> Size {
        let base = self.custom_size.unwrap_or_else(|| self.format.size());
        self.orientation.apply(base)
    }
}

pub struct Document {
    config: DocumentConfig,
    info: DocumentInfo,
    state: DocumentState,
    page_open: bool,
    default_size: Size,
    buf: ObjectBuffer,
    pages: Vec<Page>,
    fonts: Vec<FontResource>,
    font_lookup: BTreeMap<String, usize>,
    images: Vec<ImageResource>,
    image_lookup: BTreeMap<String, usize>,
    destinations: Vec<Option<(usize, f64)>>,
    cache: MetricsCache,
}

impl Document {
    pub fn new(config: DocumentConfig) -> Self {
        let default_size = config.default_size();
        let cache = MetricsCache::new(config.metrics_cache_dir.clone());
        Document {
            config,
            info: DocumentInfo::default(),
            state: DocumentState::Uninitialized,
            page_open: false,
            default_size,
            buf: ObjectBuffer::new(),
            pages: Vec::new(),
            fonts: Vec::new(),
            font_lookup: BTreeMap::new(),
            images: Vec::new(),
            image_lookup: BTreeMap::new(),
            destinations: Vec::new(),
            cache,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn info_mut(&mut self) -> &mut DocumentInfo {
        &mut self.info
    }

    /// Writes the file header and reserves the Pages root and Resources
    /// dictionary slots. Implied by the first `begin_page`.
    pub fn open(&mut self) {
        if self.state != DocumentState::Uninitialized {
            return;
        }
        self.buf.put_line(self.config.version.header_line());
        let first = self.buf.reserve(2);
        debug_assert_eq!(first, PAGES_ROOT_ID);
        self.state = DocumentState::Ready;
    }

    /// Starts a new page, closing the previous one if still open.
    pub fn begin_page(&mut self, size: Option<Size>) -> Result<(), QuireError> {
        if self.state == DocumentState::Closed {
            return Err(QuireError::InvalidState(
                "cannot add a page to a closed document".to_string(),
            ));
        }
        self.open();
        self.page_open = true;
        self.state = DocumentState::GeneratingPage;
        let size = size
            .map(|requested| self.config.orientation.apply(requested))
            .or(Some(self.default_size));
        self.pages.push(Page::new(size));
        Ok(())
    }

    pub fn end_page(&mut self) -> Result<(), QuireError> {
        if !self.page_open {
            return Err(QuireError::InvalidState("no page is open".to_string()));
        }
        self.page_open = false;
        Ok(())
    }

    /// Appends a line to the open page's content, or to the main buffer
    /// when no page is being generated. Text is Latin-1. Writes after
    /// close are dropped; the serialized bytes never change.
    pub fn out(&mut self, text: &str) {
        if self.state == DocumentState::Closed {
            return;
        }
        if self.page_open {
            if let Some(page) = self.pages.last_mut() {
                page.content.extend_from_slice(&encode_latin1(text));
                page.content.push(b'\n');
                return;
            }
        }
        self.buf.put_line(text);
    }

    pub fn out_bytes(&mut self, bytes: &[u8]) {
        if self.state == DocumentState::Closed {
            return;
        }
        if self.page_open {
            if let Some(page) = self.pages.last_mut() {
                page.content.extend_from_slice(bytes);
                page.content.push(b'\n');
                return;
            }
        }
        self.buf.put_bytes(bytes);
    }

    /// Registers a new internal link target and returns its id.
    pub fn add_link(&mut self) -> usize {
        self.destinations.push(None);
        self.destinations.len() - 1
    }

    /// Points link `id` at (1-based) `page`, vertical position `y`. The
    /// page may not exist yet; it is range-checked against the final page
    /// count when the document closes.
    pub fn set_link(&mut self, id: usize, page: usize, y: f64) -> Result<(), QuireError> {
        if page == 0 {
            return Err(QuireError::InvalidState(format!(
                "link {} targets page 0; pages are numbered from 1",
                id
            )));
        }
        match self.destinations.get_mut(id) {
            Some(slot) => {
                *slot = Some((page, y));
                Ok(())
            }
            None => Err(QuireError::InvalidState(format!("unknown link id {}", id))),
        }
    }

    /// Places a clickable rectangle on the open page.
    pub fn place_link(&mut self, link: PageLink) -> Result<(), QuireError> {
        if !self.page_open {
            return Err(QuireError::InvalidState(
                "links can only be placed on an open page".to_string(),
            ));
        }
        if let Some(page) = self.pages.last_mut() {
            page.links.push(link);
        }
        Ok(())
    }

    /// Registers one of the 14 standard fonts; repeated keys are memoized.
    /// Returns the `/F<n>` resource name.
    pub fn add_core_font(&mut self, name: &str) -> Result<String, QuireError> {
        let key = name.to_ascii_lowercase();
        if let Some(&index) = self.font_lookup.get(&key) {
            return Ok(self.fonts[index].resource_name());
        }
        let font = FontResource::core(key.clone(), self.fonts.len() + 1, name)?;
        Ok(self.push_font(key, font))
    }

    /// Registers a simple Type1/TrueType font from its program bytes.
    /// `embed` controls whether the program itself lands in the file.
    pub fn add_simple_font(
        &mut self,
        key: &str,
        variant: FontVariant,
        data: Vec<u8>,
        encoding_diff: Option<String>,
        embed: bool,
    ) -> Result<String, QuireError> {
        let key = key.to_ascii_lowercase();
        if let Some(&index) = self.font_lookup.get(&key) {
            return Ok(self.fonts[index].resource_name());
        }
        let metrics = self.load_metrics(&data)?;
        let font_file = if embed { Some(data) } else { None };
        let font = FontResource::simple(
            key.clone(),
            self.fonts.len() + 1,
            variant,
            metrics,
            encoding_diff,
            font_file,
        )?;
        Ok(self.push_font(key, font))
    }

    /// Registers a Unicode TrueType font emitted as an Identity-H subset.
    pub fn add_subset_font(&mut self, key: &str, data: Vec<u8>) -> Result<String, QuireError> {
        let key = key.to_ascii_lowercase();
        if let Some(&index) = self.font_lookup.get(&key) {
            return Ok(self.fonts[index].resource_name());
        }
        let metrics = self.load_metrics(&data)?;
        let font = FontResource::subset(key.clone(), self.fonts.len() + 1, metrics, data);
        Ok(self.push_font(key, font))
    }

    fn push_font(&mut self, key: String, font: FontResource) -> String {
        let name = font.resource_name();
        self.font_lookup.insert(key, self.fonts.len());
        self.fonts.push(font);
        name
    }

    /// Records the codepoints `text` uses with a font, so subset width
    /// and CID tables cover them.
    pub fn note_text(&mut self, font_key: &str, text: &str) -> Result<(), QuireError> {
        let key = font_key.to_ascii_lowercase();
        match self.font_lookup.get(&key) {
            Some(&index) => {
                self.fonts[index].note_text(text);
                Ok(())
            }
            None => Err(QuireError::Font(format!("unknown font: {}", font_key))),
        }
    }

    fn load_metrics(&self, data: &[u8]) -> Result<FontMetrics, QuireError> {
        if let Some(metrics) = self.cache.load(data) {
            return Ok(metrics);
        }
        let metrics = FontMetrics::from_font_data(data)?;
        self.cache.store(data, &metrics)?;
        Ok(metrics)
    }

    /// Registers an image under a stable identity key; the same key twice
    /// reuses the first XObject. Returns the `/I<n>` resource name.
    pub fn add_image(&mut self, key: &str, image: RawImage) -> Result<String, QuireError> {
        if let Some(&index) = self.image_lookup.get(key) {
            let entry = &mut self.images[index];
            entry.usage += 1;
            log::debug!("image {} reused, {} placements", entry.key, entry.usage);
            return Ok(entry.resource_name());
        }
        image.validate()?;
        let resource = ImageResource {
            key: key.to_string(),
            index: self.images.len() + 1,
            image,
            usage: 1,
            object_id: 0,
        };
        let name = resource.resource_name();
        self.image_lookup.insert(key.to_string(), self.images.len());
        self.images.push(resource);
        Ok(name)
    }

    /// Serializes everything. Runs once; calling again is a no-op and
    /// leaves the buffer untouched.
    pub fn close(&mut self) -> Result<(), QuireError> {
        if self.state == DocumentState::Closed {
            return Ok(());
        }
        if self.pages.is_empty() {
            self.begin_page(None)?;
        }
        self.page_open = false;
        self.open();

        let header_end = self.buf.len();
        self.emit_pages()?;
        let pages_end = self.buf.len();
        log::debug!(
            "pages phase: {} bytes for {} pages",
            pages_end - header_end,
            self.pages.len()
        );

        self.emit_resources()?;
        let resources_end = self.buf.len();
        log::debug!(
            "resource phase: {} bytes for {} fonts, {} images",
            resources_end - pages_end,
            self.fonts.len(),
            self.images.len()
        );

        let info_id = self.emit_info()?;
        let catalog_id = self.buf.new_object()?;
        self.buf.put_line(&format!(
            "<< /Type /Catalog /Pages {} 0 R >>",
            PAGES_ROOT_ID
        ));
        self.buf.end_object();

        self.emit_xref_and_trailer(info_id, catalog_id)?;
        self.state = DocumentState::Closed;
        Ok(())
    }

    fn emit_pages(&mut self) -> Result<(), QuireError> {
        let total = self.pages.len();
        if let Some(alias) = self.config.page_alias.clone() {
            for page in &mut self.pages {
                page.substitute_alias(&alias, total);
            }
        }

        let first_page_id = self.buf.reserve(2 * total);
        let mut kids = Vec::with_capacity(total);
        for (index, page) in self.pages.iter().enumerate() {
            let page_id = first_page_id + 2 * index;
            kids.push(format!("{} 0 R", page_id));
            page.emit(
                &mut self.buf,
                page_id,
                page_id + 1,
                self.default_size,
                self.config.compress,
                &self.destinations,
                total,
            )?;
        }

        self.buf.begin_object(PAGES_ROOT_ID)?;
        self.buf.put_line(&format!(
            "<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 {} {}] >>",
            kids.join(" "),
            total,
            fmt_pt(self.default_size.width),
            fmt_pt(self.default_size.height)
        ));
        self.buf.end_object();
        Ok(())
    }

    fn emit_resources(&mut self) -> Result<(), QuireError> {
        let mut diff_objects = BTreeMap::new();
        for font in &mut self.fonts {
            font.emit(&mut self.buf, self.config.compress, &mut diff_objects)?;
        }
        for image in &mut self.images {
            image.emit(&mut self.buf, self.config.compress)?;
        }

        let mut dict = "<< /ProcSet [/PDF /Text /ImageB /ImageC /ImageI]".to_string();
        if !self.fonts.is_empty() {
            let entries: Vec<String> = self
                .fonts
                .iter()
                .map(|font| format!("/{} {} 0 R", font.resource_name(), font.object_id))
                .collect();
            dict.push_str(&format!(" /Font << {} >>", entries.join(" ")));
        }
        if !self.images.is_empty() {
            let entries: Vec<String> = self
                .images
                .iter()
                .map(|image| format!("/{} {} 0 R", image.resource_name(), image.object_id))
                .collect();
            dict.push_str(&format!(" /XObject << {} >>", entries.join(" ")));
        }
        dict.push_str(" >>");

        self.buf.begin_object(RESOURCES_ID)?;
        self.buf.put_line(&dict);
        self.buf.end_object();
        Ok(())
    }

    fn emit_info(&mut self) -> Result<usize, QuireError> {
        let id = self.buf.new_object()?;
        let mut dict = format!(
            "<< /Producer (quire {})",
            env!("CARGO_PKG_VERSION")
        );
        let fields = [
            ("Title", &self.info.title),
            ("Subject", &self.info.subject),
            ("Author", &self.info.author),
            ("Keywords", &self.info.keywords),
            ("Creator", &self.info.creator),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                dict.push_str(&format!(" /{} ({})", key, escape_pdf_string(value)));
            }
        }
        if let Some(date) = &self.info.creation_date {
            dict.push_str(&format!(" /CreationDate (D:{})", escape_pdf_string(date)));
        }
        dict.push_str(" >>");
        self.buf.put_line(&dict);
        self.buf.end_object();
        Ok(id)
    }

    fn emit_xref_and_trailer(
        &mut self,
        info_id: usize,
        catalog_id: usize,
    ) -> Result<(), QuireError> {
        let offsets = self.buf.offsets_for_xref()?;
        let count = offsets.len();
        let xref_start = self.buf.len();
        self.buf.put_line(&format!("xref\n0 {}", count + 1));
        self.buf.put_bytes(b"0000000000 65535 f ");
        for offset in offsets {
            self.buf.put_bytes(format!("{:010} 00000 n ", offset).as_bytes());
        }
        self.buf.put_line(&format!(
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF",
            count + 1,
            catalog_id,
            info_id,
            xref_start
        ));
        log::debug!("xref at {} for {} objects", xref_start, count);
        Ok(())
    }

    /// Closes the document if needed and returns the serialized bytes.
    pub fn output_bytes(&mut self) -> Result<&[u8], QuireError> {
        self.close()?;
        Ok(self.buf.as_slice())
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, QuireError> {
        self.close()?;
        Ok(self.buf.into_bytes())
    }

    /// Closes the document if needed and writes it to `path`.
    pub fn output_to_path(&mut self, path: impl AsRef<Path>) -> Result<(), QuireError> {
        self.close()?;
        fs::write(path, self.buf.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageColorSpace, ImageFilter};

    fn count_token(bytes: &[u8], token: &[u8]) -> usize {
        if token.is_empty() || bytes.len() < token.len() {
            return 0;
        }
        bytes.windows(token.len()).filter(|w| *w == token).count()
    }

    fn simple_doc(compress: bool) -> Document {
        let mut config = DocumentConfig::default();
        config.compress = compress;
        let mut doc = Document::new(config);
        doc.add_core_font("helvetica").unwrap();
        doc.begin_page(None).unwrap();
        doc.out("BT /F1 12 Tf 50 780 Td (hello) Tj ET");
        doc.end_page().unwrap();
        doc
    }

    fn tiny_image() -> RawImage {
        RawImage {
            width: 1,
            height: 1,
            color_space: ImageColorSpace::DeviceRgb,
            bits_per_component: 8,
            filter: Some(ImageFilter::FlateDecode),
            decode_parms: None,
            data: vec![0, 0, 0],
            mask_colors: None,
            alpha: None,
        }
    }

    #[test]
    fn single_page_scenario() {
        let mut doc = simple_doc(true);
        let bytes = doc.output_bytes().unwrap().to_vec();
        assert!(bytes.starts_with(b"%PDF-1.3\n"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        assert_eq!(count_token(&bytes, b"/Type /Page /Parent"), 1);
        assert_eq!(count_token(&bytes, b"/Type /Pages"), 1);
    }

    #[test]
    fn kids_are_odd_object_numbers() {
        let mut doc = simple_doc(true);
        doc.begin_page(None).unwrap();
        doc.begin_page(None).unwrap();
        let bytes = doc.output_bytes().unwrap().to_vec();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        assert!(text.contains("/Kids [3 0 R 5 0 R 7 0 R] /Count 3"));
    }

    #[test]
    fn recorded_offsets_match_headers() {
        let mut doc = simple_doc(true);
        doc.add_image("pixel", tiny_image()).unwrap();
        doc.close().unwrap();
        let count = doc.buf.object_count();
        let bytes = doc.buf.as_slice().to_vec();
        for id in 1..=count {
            let header = format!("{} 0 obj", id);
            let offset = doc.buf.offset_of(id).unwrap();
            assert_eq!(
                &bytes[offset..offset + header.len()],
                header.as_bytes(),
                "object {}",
                id
            );
        }
    }

    #[test]
    fn xref_counts_every_object_plus_sentinel() {
        let mut doc = simple_doc(true);
        doc.close().unwrap();
        let count = doc.buf.object_count();
        let text = String::from_utf8_lossy(doc.buf.as_slice()).into_owned();
        assert!(text.contains(&format!("xref\n0 {}\n", count + 1)));
        assert!(text.contains("0000000000 65535 f \n"));
        assert!(text.contains(&format!("/Size {}", count + 1)));
        assert_eq!(count_token(text.as_bytes(), b" 00000 n \n"), count);
    }

    #[test]
    fn close_is_idempotent() {
        let mut doc = simple_doc(true);
        doc.close().unwrap();
        let first = doc.buf.as_slice().to_vec();
        doc.close().unwrap();
        assert_eq!(doc.buf.as_slice(), &first[..]);
        assert_eq!(count_token(&first, b"%%EOF"), 1);
    }

    #[test]
    fn alias_resolves_to_page_count() {
        let mut config = DocumentConfig::default();
        config.compress = false;
        let mut doc = Document::new(config);
        doc.add_core_font("helvetica").unwrap();
        for _ in 0..2 {
            doc.begin_page(None).unwrap();
            doc.out("BT (Page of {nb}) Tj ET");
            doc.end_page().unwrap();
        }
        let bytes = doc.output_bytes().unwrap().to_vec();
        assert_eq!(count_token(&bytes, b"Page of 2"), 2);
        assert_eq!(count_token(&bytes, b"{nb}"), 0);
    }

    #[test]
    fn uncompressed_contents_have_exact_length() {
        let mut doc = simple_doc(false);
        let bytes = doc.output_bytes().unwrap().to_vec();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let content = "BT /F1 12 Tf 50 780 Td (hello) Tj ET\n";
        assert!(text.contains(&format!("/Length {} >>\nstream\n{}", content.len(), content)));
        let contents_at = text.find("4 0 obj").unwrap();
        let slice = &text[contents_at..text.find("endstream").unwrap()];
        assert!(!slice.contains("/Filter"));
    }

    #[test]
    fn duplicate_image_key_is_one_xobject() {
        let mut doc = simple_doc(true);
        let first = doc.add_image("pixel", tiny_image()).unwrap();
        let second = doc.add_image("pixel", tiny_image()).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc.images[0].usage, 2);
        let bytes = doc.output_bytes().unwrap().to_vec();
        assert_eq!(count_token(&bytes, b"/Subtype /Image"), 1);
        assert_eq!(count_token(&bytes, b"/I1 "), 1);
    }

    #[test]
    fn info_and_root_close_out_the_file() {
        let mut doc = simple_doc(true);
        doc.info_mut().title = Some("Quarterly (draft)".to_string());
        doc.info_mut().author = Some("QA".to_string());
        let bytes = doc.output_bytes().unwrap().to_vec();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        assert!(text.contains("/Title (Quarterly \\(draft\\))"));
        let count = doc.buf.object_count();
        assert!(text.contains(&format!("/Root {} 0 R /Info {} 0 R", count, count - 1)));
    }

    #[test]
    fn closed_document_rejects_new_pages() {
        let mut doc = simple_doc(true);
        doc.close().unwrap();
        assert_eq!(doc.state(), DocumentState::Closed);
        assert!(doc.begin_page(None).is_err());
    }

    #[test]
    fn empty_document_closes_with_one_blank_page() {
        let mut doc = Document::new(DocumentConfig::default());
        let bytes = doc.output_bytes().unwrap().to_vec();
        assert_eq!(doc.page_count(), 1);
        assert!(bytes.starts_with(b"%PDF-1.3\n"));
    }

    #[test]
    fn link_to_page_zero_is_rejected_up_front() {
        let mut doc = simple_doc(true);
        let id = doc.add_link();
        assert!(doc.set_link(id, 0, 700.0).is_err());
        assert!(doc.set_link(id, 1, 700.0).is_ok());
    }

    #[test]
    fn link_past_the_last_page_fails_close() {
        let mut doc = Document::new(DocumentConfig::default());
        doc.begin_page(None).unwrap();
        let id = doc.add_link();
        doc.set_link(id, 9, 700.0).unwrap();
        doc.place_link(PageLink {
            rect: [10.0, 20.0, 110.0, 40.0],
            target: crate::page::LinkTarget::Internal(id),
        })
        .unwrap();
        doc.end_page().unwrap();
        let err = doc.close().unwrap_err();
        assert!(err.to_string().contains("page 9"));
    }

    #[test]
    fn writes_after_close_are_dropped() {
        let mut doc = simple_doc(true);
        doc.close().unwrap();
        let before = doc.buf.as_slice().to_vec();
        doc.out("0 0 m");
        doc.out_bytes(b"garbage");
        assert_eq!(doc.buf.as_slice(), &before[..]);
        assert!(doc.buf.as_slice().ends_with(b"%%EOF\n"));
    }

    #[test]
    fn bad_config_names_fail_up_front() {
        assert!(DocumentConfig::from_names("a4", "mm", "portrait").is_ok());
        assert!(DocumentConfig::from_names("a9", "mm", "portrait").is_err());
        assert!(DocumentConfig::from_names("a4", "parsec", "portrait").is_err());
        assert!(DocumentConfig::from_names("a4", "mm", "diagonal").is_err());
    }

    #[test]
    fn output_parses_with_lopdf() {
        let mut doc = simple_doc(true);
        doc.add_image("pixel", tiny_image()).unwrap();
        let bytes = doc.output_bytes().unwrap().to_vec();
        let parsed = lopdf::Document::load_mem(&bytes).expect("well-formed file");
        assert_eq!(parsed.get_pages().len(), 1);
    }
}
