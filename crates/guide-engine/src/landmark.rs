use std::io::Cursor;

use anyhow::{Context, Result};
use image::ImageFormat;
use sha2::{Digest, Sha256};

use crate::inference::{
    AttemptFailure, EndpointSettings, FailureKind, InferenceClient, InferenceFailure, Payload,
};
use crate::reply::GuideReply;

pub const CAPTION_SERVICE: &str = "Image model";
pub const PNG_CONTENT_TYPE: &str = "image/png";

pub const UNAVAILABLE_MESSAGE: &str = "Image model is currently unavailable. Please try again.";
pub const UNDESCRIBABLE_MESSAGE: &str =
    "Landmark detected but it could not be described. Please try another image.";
pub const INVALID_IMAGE_MESSAGE: &str = "Failed to identify landmark. Please try another image.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
    pub sha256: String,
}

/// An uploaded image re-encoded as PNG, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub png: Vec<u8>,
    pub summary: ImageSummary,
}

/// Decodes any supported raster format and re-encodes it as PNG so the
/// captioning endpoint always receives the same lossless encoding.
pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage> {
    let image = image::load_from_memory(bytes).context("unsupported or corrupt image data")?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode image as PNG")?;
    Ok(PreparedImage {
        png,
        summary: ImageSummary {
            width: image.width(),
            height: image.height(),
            byte_len: bytes.len(),
            sha256: hex::encode(Sha256::digest(bytes)),
        },
    })
}

pub struct LandmarkIdentifier {
    client: InferenceClient,
    endpoint: EndpointSettings,
}

impl LandmarkIdentifier {
    pub fn new(client: InferenceClient, endpoint: EndpointSettings) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &EndpointSettings {
        &self.endpoint
    }

    pub fn identify(&self, image: &[u8]) -> GuideReply {
        match prepare_image(image) {
            Ok(prepared) => self.identify_prepared(&prepared, &mut |_| {}),
            Err(_) => invalid_image_reply(),
        }
    }

    pub fn identify_prepared(
        &self,
        image: &PreparedImage,
        on_failed_attempt: &mut dyn FnMut(&AttemptFailure),
    ) -> GuideReply {
        let request = self.endpoint.request(Payload::Bytes {
            content_type: PNG_CONTENT_TYPE.to_string(),
            body: image.png.clone(),
        });
        let result = self
            .client
            .call_observed(&request, &self.endpoint.retry, on_failed_attempt);
        match result {
            Ok(caption) => GuideReply::answered(caption),
            Err(failure) => failure_reply(&failure),
        }
    }
}

pub fn invalid_image_reply() -> GuideReply {
    GuideReply::fallback(FailureKind::InvalidImage, INVALID_IMAGE_MESSAGE)
}

fn failure_reply(failure: &InferenceFailure) -> GuideReply {
    match failure.kind() {
        FailureKind::ServiceUnavailable => {
            GuideReply::fallback(FailureKind::ServiceUnavailable, UNAVAILABLE_MESSAGE)
        }
        kind => GuideReply::fallback(kind, UNDESCRIBABLE_MESSAGE),
    }
}

#[cfg(test)]
pub(crate) fn sample_image(format: ImageFormat) -> Vec<u8> {
    let mut image = image::RgbImage::new(8, 6);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = image::Rgb([(x * 30) as u8, (y * 40) as u8, 128]);
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}
