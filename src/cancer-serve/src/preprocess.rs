use image::imageops::FilterType;
use image::DynamicImage;

use crate::model::INPUT_SIZE;
use crate::timer::Timer;

/// An uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Content type declared for the file part, if any.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(content_type: Option<&str>, data: Vec<u8>) -> Self {
        Upload {
            content_type: content_type.map(str::to_owned),
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no image file uploaded")]
    MissingUpload,
    #[error("declared content type {0:?} is not an image type")]
    NotAnImage(Option<String>),
    #[error("upload is not a decodable image: {0}")]
    InvalidImageData(#[from] image::ImageError),
}

/// A decoded image resized to the model's input footprint.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: DynamicImage,
}

impl PixelBuffer {
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        PixelBuffer { image }
    }
}

/// Cheap checks done before any decoding: an upload must be present,
/// non-empty, and declared as `image/*`.
pub fn validate(upload: Option<Upload>) -> Result<Upload, ValidationError> {
    let upload = match upload {
        Some(upload) if !upload.data.is_empty() => upload,
        _ => return Err(ValidationError::MissingUpload),
    };

    let is_image = upload
        .content_type
        .as_deref()
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false);
    if !is_image {
        return Err(ValidationError::NotAnImage(upload.content_type));
    }

    Ok(upload)
}

/// Decode `data` and scale it to fill 224x224, cropping the overflow evenly.
pub fn decode_and_resize(data: &[u8]) -> Result<PixelBuffer, ValidationError> {
    let mut t = Timer::new_start("Load image from memory");
    let image = image::load_from_memory(data)?;
    t.stop();

    let mut t = Timer::new_start("Resizing image");
    let resized = image.resize_to_fill(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    t.stop();

    Ok(PixelBuffer::from(resized))
}

/// Both steps in order.
pub fn normalize(upload: Option<Upload>) -> Result<PixelBuffer, ValidationError> {
    let upload = validate(upload)?;
    decode_and_resize(&upload.data)
}
