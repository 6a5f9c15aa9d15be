//! Thumbnail derivation: decode, resize to fill, encode.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use std::io::{Cursor, Seek, SeekFrom};

use super::buffer::{OriginalBuffer, ReadSeek};
use crate::config::{LimitsConfig, ThumbnailConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::store::ObjectId;
use crate::types::Dimensions;

/// Output of the derive step.
#[derive(Debug, Clone)]
pub struct DerivedImage {
    /// Encoded thumbnail bytes
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub content_type: String,
    /// Thumbnail dimensions, always the configured target
    pub dimensions: Dimensions,
    /// Dimensions of the decoded original
    pub source_dimensions: Dimensions,
}

/// Turns an original into a thumbnail. Runs on a blocking thread.
pub trait Deriver: Send + Sync {
    fn derive(
        &self,
        photo_id: &ObjectId,
        original: &OriginalBuffer,
    ) -> PipelineResult<DerivedImage>;
}

/// Generates fixed-size thumbnails with the `image` crate.
pub struct ThumbnailGenerator {
    config: ThumbnailConfig,
    max_dimension: u32,
}

impl ThumbnailGenerator {
    /// Create a new thumbnail generator with the given configuration.
    pub fn new(config: ThumbnailConfig, limits: &LimitsConfig) -> Self {
        Self {
            config,
            max_dimension: limits.max_image_dimension,
        }
    }

    pub fn target(&self) -> Dimensions {
        Dimensions {
            width: self.config.width,
            height: self.config.height,
        }
    }

    /// MIME type of every thumbnail this generator produces.
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.config.format)
    }

    /// Resize `image` to exactly the target size, cropping to keep the aspect ratio.
    pub fn generate_bytes(
        &self,
        photo_id: &ObjectId,
        image: &DynamicImage,
    ) -> PipelineResult<Vec<u8>> {
        let thumbnail =
            image.resize_to_fill(self.config.width, self.config.height, FilterType::Lanczos3);
        self.encode(photo_id, thumbnail)
    }

    fn encode(&self, photo_id: &ObjectId, image: DynamicImage) -> PipelineResult<Vec<u8>> {
        let encode_err = |e: ImageError| PipelineError::Encode {
            photo_id: photo_id.to_string(),
            message: e.to_string(),
        };
        let mut buffer = Cursor::new(Vec::new());

        match self.config.format.to_lowercase().as_str() {
            "png" => image
                .write_to(&mut buffer, ImageFormat::Png)
                .map_err(encode_err)?,
            "webp" => DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut buffer, ImageFormat::WebP)
                .map_err(encode_err)?,
            // JPEG has no alpha channel.
            _ => {
                let rgb = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut buffer, self.config.quality)
                    .encode_image(&rgb)
                    .map_err(encode_err)?
            }
        }

        Ok(buffer.into_inner())
    }

    fn decode(
        &self,
        photo_id: &ObjectId,
        reader: &mut dyn ReadSeek,
    ) -> PipelineResult<DynamicImage> {
        let header = ImageReader::new(&mut *reader)
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode {
                photo_id: photo_id.to_string(),
                message: format!("Cannot detect image format: {e}"),
            })?;
        let Some(format) = header.format() else {
            return Err(PipelineError::UnsupportedFormat {
                photo_id: photo_id.to_string(),
                format: "unknown".to_string(),
            });
        };

        // Check dimensions from the header before allocating the full raster.
        let (width, height) = header
            .into_dimensions()
            .map_err(|e| image_error(photo_id, e))?;
        if width > self.max_dimension || height > self.max_dimension {
            return Err(PipelineError::ImageTooLarge {
                photo_id: photo_id.to_string(),
                width,
                height,
                max_dim: self.max_dimension,
            });
        }

        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| PipelineError::Decode {
                photo_id: photo_id.to_string(),
                message: e.to_string(),
            })?;
        ImageReader::with_format(reader, format)
            .decode()
            .map_err(|e| image_error(photo_id, e))
    }
}

fn image_error(photo_id: &ObjectId, error: ImageError) -> PipelineError {
    match error {
        ImageError::Unsupported(u) => PipelineError::UnsupportedFormat {
            photo_id: photo_id.to_string(),
            format: u.to_string(),
        },
        other => PipelineError::Decode {
            photo_id: photo_id.to_string(),
            message: other.to_string(),
        },
    }
}

impl Deriver for ThumbnailGenerator {
    fn derive(
        &self,
        photo_id: &ObjectId,
        original: &OriginalBuffer,
    ) -> PipelineResult<DerivedImage> {
        let image = original
            .with_reader(|reader| Ok(self.decode(photo_id, reader)))
            .map_err(|source| PipelineError::Scratch {
                photo_id: photo_id.to_string(),
                source,
            })??;

        let source_dimensions = Dimensions {
            width: image.width(),
            height: image.height(),
        };
        let bytes = self.generate_bytes(photo_id, &image)?;

        Ok(DerivedImage {
            bytes,
            content_type: self.content_type().to_string(),
            dimensions: self.target(),
            source_dimensions,
        })
    }
}

/// MIME type for a configured thumbnail format.
pub fn content_type_for(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn config(width: u32, height: u32, format: &str) -> ThumbnailConfig {
        ThumbnailConfig {
            width,
            height,
            format: format.to_string(),
            quality: 80,
        }
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, format)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_jpeg_thumbnail_has_exact_target_size() {
        let generator = ThumbnailGenerator::new(config(100, 100, "jpeg"), &LimitsConfig::default());
        let original = OriginalBuffer::Memory(encoded(300, 200, ImageFormat::Jpeg));

        let derived = generator.derive(&ObjectId::generate(), &original).unwrap();
        assert_eq!(derived.content_type, "image/jpeg");
        assert_eq!(
            derived.dimensions,
            Dimensions {
                width: 100,
                height: 100
            }
        );
        assert_eq!(
            derived.source_dimensions,
            Dimensions {
                width: 300,
                height: 200
            }
        );
        // JPEG SOI marker
        assert_eq!(&derived.bytes[0..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&derived.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 100));
    }

    #[test]
    fn test_png_input_with_alpha_to_jpeg() {
        let generator = ThumbnailGenerator::new(config(64, 32, "jpeg"), &LimitsConfig::default());
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(50, 80)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        let original = OriginalBuffer::Memory(buffer.into_inner());

        let derived = generator.derive(&ObjectId::generate(), &original).unwrap();
        let decoded = image::load_from_memory(&derived.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn test_webp_output() {
        let generator = ThumbnailGenerator::new(config(16, 16, "webp"), &LimitsConfig::default());
        let original = OriginalBuffer::Memory(encoded(40, 40, ImageFormat::Png));

        let derived = generator.derive(&ObjectId::generate(), &original).unwrap();
        assert_eq!(derived.content_type, "image/webp");
        // WebP files start with "RIFF"
        assert_eq!(&derived.bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_corrupt_original_is_permanent() {
        let generator = ThumbnailGenerator::new(config(100, 100, "jpeg"), &LimitsConfig::default());
        let mut bytes = encoded(100, 100, ImageFormat::Jpeg);
        bytes.truncate(40);
        let original = OriginalBuffer::Memory(bytes);

        let err = generator
            .derive(&ObjectId::generate(), &original)
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_unrecognized_bytes_are_unsupported() {
        let generator = ThumbnailGenerator::new(config(100, 100, "jpeg"), &LimitsConfig::default());
        let original = OriginalBuffer::Memory(b"definitely not an image".to_vec());

        let err = generator
            .derive(&ObjectId::generate(), &original)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_dimension_limit() {
        let limits = LimitsConfig {
            max_image_dimension: 50,
            ..LimitsConfig::default()
        };
        let generator = ThumbnailGenerator::new(config(10, 10, "jpeg"), &limits);
        let original = OriginalBuffer::Memory(encoded(120, 30, ImageFormat::Png));

        let err = generator
            .derive(&ObjectId::generate(), &original)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageTooLarge { .. }));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("JPG"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("webp"), "image/webp");
    }
}
