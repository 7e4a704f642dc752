use crate::error::QuireError;

/// Page dimensions in PostScript points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Size { width, height }
    }

    pub fn rotated(self) -> Self {
        Size {
            width: self.height,
            height: self.width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    A3,
    A4,
    A5,
    Letter,
    Legal,
}

impl PageFormat {
    pub fn from_name(name: &str) -> Result<Self, QuireError> {
        match name.to_ascii_lowercase().as_str() {
            "a3" => Ok(PageFormat::A3),
            "a4" => Ok(PageFormat::A4),
            "a5" => Ok(PageFormat::A5),
            "letter" => Ok(PageFormat::Letter),
            "legal" => Ok(PageFormat::Legal),
            other => Err(QuireError::InvalidConfiguration(format!(
                "unknown page format: {}",
                other
            ))),
        }
    }

    pub fn size(self) -> Size {
        match self {
            PageFormat::A3 => Size::new(841.89, 1190.55),
            PageFormat::A4 => Size::new(595.28, 841.89),
            PageFormat::A5 => Size::new(420.94, 595.28),
            PageFormat::Letter => Size::new(612.0, 792.0),
            PageFormat::Legal => Size::new(612.0, 1008.0),
        }
    }
}

/// Caller-facing measurement unit; all internal geometry is points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Pt,
    Mm,
    Cm,
    In,
}

impl Unit {
    pub fn from_name(name: &str) -> Result<Self, QuireError> {
        match name.to_ascii_lowercase().as_str() {
            "pt" => Ok(Unit::Pt),
            "mm" => Ok(Unit::Mm),
            "cm" => Ok(Unit::Cm),
            "in" => Ok(Unit::In),
            other => Err(QuireError::InvalidConfiguration(format!(
                "unknown unit: {}",
                other
            ))),
        }
    }

    /// Points per one of this unit.
    pub fn scale(self) -> f64 {
        match self {
            Unit::Pt => 1.0,
            Unit::Mm => 72.0 / 25.4,
            Unit::Cm => 72.0 / 2.54,
            Unit::In => 72.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn from_name(name: &str) -> Result<Self, QuireError> {
        match name.to_ascii_lowercase().as_str() {
            "p" | "portrait" => Ok(Orientation::Portrait),
            "l" | "landscape" => Ok(Orientation::Landscape),
            other => Err(QuireError::InvalidConfiguration(format!(
                "unknown orientation: {}",
                other
            ))),
        }
    }

    pub fn apply(self, size: Size) -> Size {
        match self {
            Orientation::Portrait => {
                if size.width > size.height {
                    size.rotated()
                } else {
                    size
                }
            }
            Orientation::Landscape => {
                if size.height > size.width {
                    size.rotated()
                } else {
                    size
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PdfVersion {
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    V1_7,
}

impl PdfVersion {
    pub fn header_line(self) -> &'static str {
        match self {
            PdfVersion::V1_3 => "%PDF-1.3",
            PdfVersion::V1_4 => "%PDF-1.4",
            PdfVersion::V1_5 => "%PDF-1.5",
            PdfVersion::V1_6 => "%PDF-1.6",
            PdfVersion::V1_7 => "%PDF-1.7",
        }
    }
}

/// Fields for the document Info dictionary.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub creation_date: Option<String>,
}
