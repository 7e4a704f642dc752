//! Per-page content accumulation and Page/Contents object emission.

use crate::buffer::ObjectBuffer;
use crate::error::QuireError;
use crate::syntax::{
    encode_latin1, encode_utf16be, escape_pdf_string, flate_compress, fmt_pt, replace_bytes,
};
use crate::types::Size;

#[derive(Debug, Clone)]
pub enum LinkTarget {
    Uri(String),
    /// Id of a destination registered on the document.
    Internal(usize),
}

/// A clickable rectangle on a page, in PDF coordinates.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub rect: [f64; 4],
    pub target: LinkTarget,
}

pub(crate) struct Page {
    pub(crate) content: Vec<u8>,
    pub(crate) size: Option<Size>,
    pub(crate) links: Vec<PageLink>,
}

impl Page {
    pub(crate) fn new(size: Option<Size>) -> Self {
        Page {
            content: Vec::new(),
            size,
            links: Vec::new(),
        }
    }

    /// Replaces the total-pages alias with the final count, in both the
    /// UTF-16BE form Unicode text carries and the plain Latin-1 form.
    /// Must run before this page's objects are emitted since it changes
    /// the content length.
    pub(crate) fn substitute_alias(&mut self, alias: &str, total_pages: usize) {
        if alias.is_empty() {
            return;
        }
        let total = total_pages.to_string();
        let content = replace_bytes(
            &self.content,
            &encode_utf16be(alias),
            &encode_utf16be(&total),
        );
        self.content = replace_bytes(&content, &encode_latin1(alias), &encode_latin1(&total));
    }

    /// Writes the Page dictionary and its Contents stream into the two
    /// reserved slots. `destinations[id]` maps a link id to its
    /// (1-based page, y) target; targets past `page_count` are errors.
    pub(crate) fn emit(
        &self,
        buf: &mut ObjectBuffer,
        page_id: usize,
        content_id: usize,
        default_size: Size,
        compress: bool,
        destinations: &[Option<(usize, f64)>],
        page_count: usize,
    ) -> Result<(), QuireError> {
        let mut dict = "<< /Type /Page /Parent 1 0 R".to_string();
        if let Some(size) = self.size {
            if size != default_size {
                dict.push_str(&format!(
                    " /MediaBox [0 0 {} {}]",
                    fmt_pt(size.width),
                    fmt_pt(size.height)
                ));
            }
        }
        dict.push_str(" /Resources 2 0 R");
        if !self.links.is_empty() {
            dict.push_str(&format!(
                " /Annots [{}]",
                self.annotations(destinations, page_count)?
            ));
        }
        dict.push_str(&format!(" /Contents {} 0 R >>", content_id));

        buf.begin_object(page_id)?;
        buf.put_line(&dict);
        buf.end_object();

        buf.begin_object(content_id)?;
        if compress {
            buf.put_stream("/Filter /FlateDecode", &flate_compress(&self.content));
        } else {
            buf.put_stream("", &self.content);
        }
        Ok(())
    }

    fn annotations(
        &self,
        destinations: &[Option<(usize, f64)>],
        page_count: usize,
    ) -> Result<String, QuireError> {
        let mut entries = Vec::new();
        for link in &self.links {
            let [x1, y1, x2, y2] = link.rect;
            let action = match &link.target {
                LinkTarget::Uri(uri) => {
                    format!("/A << /S /URI /URI ({}) >>", escape_pdf_string(uri))
                }
                LinkTarget::Internal(id) => {
                    let (page, y) = destinations
                        .get(*id)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            QuireError::InvalidState(format!("link {} has no destination", id))
                        })?;
                    if page == 0 || page > page_count {
                        return Err(QuireError::InvalidState(format!(
                            "link {} targets page {} of {}",
                            id, page, page_count
                        )));
                    }
                    // Page objects sit at 3, 5, 7, ...
                    let page_object = 3 + 2 * (page - 1);
                    format!("/Dest [{} 0 R /XYZ 0 {} null]", page_object, fmt_pt(y))
                }
            };
            entries.push(format!(
                "<< /Type /Annot /Subtype /Link /Rect [{} {} {} {}] /Border [0 0 0] {} >>",
                fmt_pt(x1),
                fmt_pt(y1),
                fmt_pt(x2),
                fmt_pt(y2),
                action
            ));
        }
        Ok(entries.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_is_replaced_in_both_encodings() {
        let mut page = Page::new(None);
        page.content.extend_from_slice(b"BT (Page 1 of {nb}) Tj ET\n");
        page.content.extend_from_slice(&encode_utf16be("Seite 1 von {nb}"));
        page.substitute_alias("{nb}", 12);

        let latin = b"Page 1 of 12";
        assert!(page.content.windows(latin.len()).any(|w| w == latin));
        let wide = encode_utf16be("Seite 1 von 12");
        assert!(page.content.windows(wide.len()).any(|w| w == &wide[..]));
        assert!(!page.content.windows(4).any(|w| w == b"{nb}"));
    }

    #[test]
    fn default_sized_page_omits_mediabox() {
        let default = Size::new(595.28, 841.89);
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        let page = Page::new(Some(default));
        page.emit(&mut buf, 1, 2, default, false, &[], 1).unwrap();
        let text = String::from_utf8_lossy(buf.as_slice()).into_owned();
        assert!(!text.contains("/MediaBox"));
        assert!(text.contains("/Contents 2 0 R"));
    }

    #[test]
    fn override_size_records_mediabox() {
        let default = Size::new(595.28, 841.89);
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        let page = Page::new(Some(Size::new(612.0, 792.0)));
        page.emit(&mut buf, 1, 2, default, false, &[], 1).unwrap();
        let text = String::from_utf8_lossy(buf.as_slice()).into_owned();
        assert!(text.contains("/MediaBox [0 0 612.00 792.00]"));
    }

    #[test]
    fn internal_link_targets_the_page_object() {
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        let mut page = Page::new(None);
        page.links.push(PageLink {
            rect: [10.0, 20.0, 110.0, 40.0],
            target: LinkTarget::Internal(0),
        });
        let destinations = vec![Some((3usize, 700.0f64))];
        page.emit(
            &mut buf,
            1,
            2,
            Size::new(595.28, 841.89),
            false,
            &destinations,
            3,
        )
        .unwrap();
        let text = String::from_utf8_lossy(buf.as_slice()).into_owned();
        // Page 3 lives at object 3 + 2*2 = 7.
        assert!(text.contains("/Dest [7 0 R /XYZ 0 700.00 null]"));
    }

    #[test]
    fn unresolved_link_is_an_error() {
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        let mut page = Page::new(None);
        page.links.push(PageLink {
            rect: [0.0, 0.0, 1.0, 1.0],
            target: LinkTarget::Internal(5),
        });
        let result = page.emit(&mut buf, 1, 2, Size::new(595.28, 841.89), false, &[], 1);
        assert!(result.is_err());
    }

    #[test]
    fn destination_past_the_last_page_is_an_error() {
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        let mut page = Page::new(None);
        page.links.push(PageLink {
            rect: [0.0, 0.0, 1.0, 1.0],
            target: LinkTarget::Internal(0),
        });
        let destinations = vec![Some((9usize, 700.0f64))];
        let result = page.emit(
            &mut buf,
            1,
            2,
            Size::new(595.28, 841.89),
            false,
            &destinations,
            1,
        );
        assert!(result.is_err());
    }
}
