//! Decoded photos: PNG encoding for upload and face cropping.

use crate::types::FaceRectangle;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("failed to read photo: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode photo: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode photo: {0}")]
    Encode(#[source] image::ImageError),
    #[error("face rectangle {rect:?} lies outside the {width}x{height} photo")]
    OutOfBounds {
        rect: FaceRectangle,
        width: u32,
        height: u32,
    },
}

/// An in-memory decoded photo.
#[derive(Debug, Clone)]
pub struct Photo {
    image: DynamicImage,
}

impl Photo {
    /// Decode a photo from a file; the format is guessed from its contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PhotoError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Decode a photo from encoded bytes (JPEG, PNG, ...).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PhotoError> {
        let image = image::load_from_memory(bytes).map_err(PhotoError::Decode)?;
        Ok(Self { image })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as PNG, the body format sent to the upload and detect endpoints.
    pub fn to_png(&self) -> Result<Vec<u8>, PhotoError> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(PhotoError::Encode)?;
        Ok(buf.into_inner())
    }

    /// Crop the region described by `rect`, clamped to the photo bounds.
    pub fn crop(&self, rect: &FaceRectangle) -> Result<Photo, PhotoError> {
        let (width, height) = (self.width(), self.height());
        let out_of_bounds = || PhotoError::OutOfBounds {
            rect: *rect,
            width,
            height,
        };

        if rect.left >= width || rect.top >= height || rect.width == 0 || rect.height == 0 {
            return Err(out_of_bounds());
        }

        let w = rect.width.min(width - rect.left);
        let h = rect.height.min(height - rect.top);
        Ok(Photo {
            image: self.image.crop_imm(rect.left, rect.top, w, h),
        })
    }

    /// Write the photo to disk; the format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PhotoError> {
        self.image.save(path).map_err(PhotoError::Encode)
    }
}
