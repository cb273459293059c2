//! Upload checks applied before an image enters the pipeline.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::Path;

use crate::config::UploadSettings;
use crate::error::InputRejection;

/// An uploaded label photo.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// File name or other caller-facing label
    pub name: String,
    /// Declared MIME type, if the caller sent one
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }

    /// Reads a file from disk, declaring its MIME type from the extension.
    ///
    /// Files over the size limit are refused from their metadata, before any
    /// bytes are read.
    pub fn from_path(path: &Path, settings: &UploadSettings) -> Result<Self> {
        let size = fs::metadata(path).context("Failed to stat upload")?.len();
        if size > settings.max_bytes as u64 {
            return Err(InputRejection::TooLarge {
                size: usize::try_from(size).unwrap_or(usize::MAX),
                max: settings.max_bytes,
            }
            .into());
        }

        let bytes = fs::read(path).context("Failed to read upload")?;
        let content_type = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type().to_string());

        Ok(Self::new(path.display().to_string(), content_type, bytes))
    }
}

/// Checks size, declared type and magic bytes.
///
/// Returns the sniffed format. Nothing is decoded here.
pub fn validate_upload(upload: &ImageUpload, settings: &UploadSettings) -> Result<ImageFormat, InputRejection> {
    let size = upload.bytes.len();
    if size > settings.max_bytes {
        return Err(InputRejection::TooLarge {
            size,
            max: settings.max_bytes,
        });
    }

    if let Some(content_type) = &upload.content_type {
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(InputRejection::UnsupportedType(content_type.clone()));
        }
    }

    match image::guess_format(&upload.bytes) {
        Ok(format) => Ok(format),
        Err(_) if upload.content_type.is_some() => {
            Err(InputRejection::Undecodable("unrecognized image data".to_string()))
        }
        Err(_) => Err(InputRejection::UnsupportedType("unknown".to_string())),
    }
}

/// Decodes a validated upload.
pub fn decode_upload(upload: &ImageUpload, format: ImageFormat) -> Result<DynamicImage, InputRejection> {
    image::load_from_memory_with_format(&upload.bytes, format)
        .map_err(|e| InputRejection::Undecodable(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::io::Cursor;

    /// PNG bytes of a small label-like image.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            if (10..30).contains(&y) && x % 7 < 4 {
                Rgb([20, 20, 20])
            } else {
                Rgb([250, 250, 250])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_accepts_png() {
        let upload = ImageUpload::new("label.png", Some("image/png".to_string()), png_bytes(40, 40));
        let format = validate_upload(&upload, &UploadSettings::default()).unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert!(decode_upload(&upload, format).is_ok());
    }

    #[test]
    fn test_rejects_oversized_before_sniffing() {
        let upload = ImageUpload::new("huge.png", Some("image/png".to_string()), vec![0u8; 2048]);
        let settings = UploadSettings { max_bytes: 1024 };
        assert_eq!(
            validate_upload(&upload, &settings),
            Err(InputRejection::TooLarge { size: 2048, max: 1024 })
        );
    }

    #[test]
    fn test_rejects_non_image_type() {
        let upload = ImageUpload::new("notes.pdf", Some("application/pdf".to_string()), png_bytes(8, 8));
        assert_eq!(
            validate_upload(&upload, &UploadSettings::default()),
            Err(InputRejection::UnsupportedType("application/pdf".to_string()))
        );
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let declared = ImageUpload::new("label.png", Some("image/png".to_string()), b"not a png".to_vec());
        assert!(matches!(
            validate_upload(&declared, &UploadSettings::default()),
            Err(InputRejection::Undecodable(_))
        ));

        let undeclared = ImageUpload::new("blob", None, b"not a png".to_vec());
        assert!(matches!(
            validate_upload(&undeclared, &UploadSettings::default()),
            Err(InputRejection::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_from_path_refuses_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.png");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let err = ImageUpload::from_path(&path, &UploadSettings { max_bytes: 1024 }).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputRejection>(),
            Some(&InputRejection::TooLarge { size: 2048, max: 1024 })
        );
    }

    #[test]
    fn test_from_path_declares_type_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label.png");
        std::fs::write(&path, png_bytes(20, 20)).unwrap();

        let upload = ImageUpload::from_path(&path, &UploadSettings::default()).unwrap();
        assert_eq!(upload.content_type.as_deref(), Some("image/png"));
        assert_eq!(upload.bytes.len() as u64, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_truncated_image_is_undecodable() {
        let mut bytes = png_bytes(40, 40);
        bytes.truncate(64);
        let upload = ImageUpload::new("cut.png", None, bytes);
        let format = validate_upload(&upload, &UploadSettings::default()).unwrap();
        assert!(matches!(decode_upload(&upload, format), Err(InputRejection::Undecodable(_))));
    }
}
