//! Image XObject emission. Callers hand over decoded pixel data and
//! metadata; decoding file formats is not this crate's concern.

use crate::buffer::ObjectBuffer;
use crate::error::QuireError;
use crate::syntax::flate_compress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageColorSpace {
    DeviceRgb,
    DeviceGray,
    DeviceCmyk,
    /// Palette bytes are packed RGB triples.
    Indexed(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    FlateDecode,
    DctDecode,
}

impl ImageFilter {
    fn name(self) -> &'static str {
        match self {
            ImageFilter::FlateDecode => "/FlateDecode",
            ImageFilter::DctDecode => "/DCTDecode",
        }
    }
}

/// One decoded image as supplied by a collaborator.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ImageColorSpace,
    pub bits_per_component: u8,
    pub filter: Option<ImageFilter>,
    /// Extra `/DecodeParms` entries, without the enclosing `<< >>`.
    pub decode_parms: Option<String>,
    pub data: Vec<u8>,
    /// Color-key transparency component values.
    pub mask_colors: Option<Vec<u32>>,
    /// Alpha plane, encoded with the same filter as the image data.
    pub alpha: Option<Vec<u8>>,
}

impl RawImage {
    pub(crate) fn validate(&self) -> Result<(), QuireError> {
        if self.width == 0 || self.height == 0 {
            return Err(QuireError::Image("image has zero dimension".to_string()));
        }
        if let ImageColorSpace::Indexed(palette) = &self.color_space {
            if palette.is_empty() || palette.len() % 3 != 0 {
                return Err(QuireError::Image(format!(
                    "indexed palette length {} is not a multiple of 3",
                    palette.len()
                )));
            }
        }
        Ok(())
    }
}

/// One deduplicated image; `index` fixes its `/I<n>` resource name in
/// first-use order.
pub(crate) struct ImageResource {
    pub(crate) key: String,
    pub(crate) index: usize,
    pub(crate) image: RawImage,
    pub(crate) usage: usize,
    pub(crate) object_id: usize,
}

impl ImageResource {
    pub(crate) fn resource_name(&self) -> String {
        format!("I{}", self.index)
    }

    pub(crate) fn emit(
        &mut self,
        buf: &mut ObjectBuffer,
        compress: bool,
    ) -> Result<usize, QuireError> {
        let id = buf.reserve(1);
        emit_image_at(buf, id, &self.image, compress)?;
        self.object_id = id;
        Ok(id)
    }
}

fn emit_image_at(
    buf: &mut ObjectBuffer,
    id: usize,
    image: &RawImage,
    compress: bool,
) -> Result<(), QuireError> {
    let smask_id = image.alpha.as_ref().map(|_| buf.reserve(1));
    let palette_id = match &image.color_space {
        ImageColorSpace::Indexed(_) => Some(buf.reserve(1)),
        _ => None,
    };

    let mut dict = format!(
        "/Type /XObject /Subtype /Image /Width {} /Height {}",
        image.width, image.height
    );
    match (&image.color_space, palette_id) {
        (ImageColorSpace::Indexed(palette), Some(palette_id)) => {
            let hival = palette.len() / 3 - 1;
            dict.push_str(&format!(
                " /ColorSpace [/Indexed /DeviceRGB {} {} 0 R]",
                hival, palette_id
            ));
        }
        (ImageColorSpace::DeviceRgb, _) => dict.push_str(" /ColorSpace /DeviceRGB"),
        (ImageColorSpace::DeviceGray, _) => dict.push_str(" /ColorSpace /DeviceGray"),
        (ImageColorSpace::DeviceCmyk, _) => {
            dict.push_str(" /ColorSpace /DeviceCMYK /Decode [1 0 1 0 1 0 1 0]")
        }
        (ImageColorSpace::Indexed(_), None) => {
            return Err(QuireError::Image(format!(
                "indexed image in object {} lost its palette reservation",
                id
            )));
        }
    }
    dict.push_str(&format!(" /BitsPerComponent {}", image.bits_per_component));
    if let Some(filter) = image.filter {
        dict.push_str(&format!(" /Filter {}", filter.name()));
    }
    if let Some(parms) = &image.decode_parms {
        dict.push_str(&format!(" /DecodeParms << {} >>", parms));
    }
    if let Some(mask) = &image.mask_colors {
        let entries: Vec<String> = mask.iter().map(|v| format!("{} {}", v, v)).collect();
        dict.push_str(&format!(" /Mask [{}]", entries.join(" ")));
    }
    if let Some(smask_id) = smask_id {
        dict.push_str(&format!(" /SMask {} 0 R", smask_id));
    }

    buf.begin_object(id)?;
    buf.put_stream(&dict, &image.data);

    if let (Some(alpha), Some(smask_id)) = (&image.alpha, smask_id) {
        let smask = smask_image(image, alpha.clone());
        emit_image_at(buf, smask_id, &smask, compress)?;
    }

    if let (ImageColorSpace::Indexed(palette), Some(palette_id)) =
        (&image.color_space, palette_id)
    {
        buf.begin_object(palette_id)?;
        if compress {
            buf.put_stream("/Filter /FlateDecode", &flate_compress(palette));
        } else {
            buf.put_stream("", palette);
        }
    }
    Ok(())
}

/// The alpha plane as a standalone grayscale image, reusing the parent's
/// filter with predictor parameters pinned to one channel.
fn smask_image(parent: &RawImage, alpha: Vec<u8>) -> RawImage {
    RawImage {
        width: parent.width,
        height: parent.height,
        color_space: ImageColorSpace::DeviceGray,
        bits_per_component: 8,
        filter: parent.filter,
        decode_parms: Some(format!(
            "/Predictor 15 /Colors 1 /BitsPerComponent 8 /Columns {}",
            parent.width
        )),
        data: alpha,
        mask_colors: None,
        alpha: None,
    }
}
