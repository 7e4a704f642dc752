mod buffer;
mod cache;
mod document;
mod error;
mod font;
mod image;
mod metrics;
mod page;
mod syntax;
mod types;

pub use document::{Document, DocumentConfig, DocumentState};
pub use error::QuireError;
pub use font::FontVariant;
pub use image::{ImageColorSpace, ImageFilter, RawImage};
pub use metrics::FontMetrics;
pub use page::{LinkTarget, PageLink};
pub use types::{DocumentInfo, Orientation, PageFormat, PdfVersion, Size, Unit};
