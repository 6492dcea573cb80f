//! Pre-submission checks. Failures here are `Validation` errors and never
//! reach the transport.

use crate::error::{IngestError, Result};
use crate::types::{AssetKind, UploadRequest};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Png,
    Jpeg,
    Bmp,
    Gif,
    Mp3,
    Ogg,
    Wav,
    Flac,
    BinaryModel,
    XmlModel,
}

impl ContentFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentFormat::Png => "image/png",
            ContentFormat::Jpeg => "image/jpeg",
            ContentFormat::Bmp => "image/bmp",
            ContentFormat::Gif => "image/gif",
            ContentFormat::Mp3 => "audio/mpeg",
            ContentFormat::Ogg => "audio/ogg",
            ContentFormat::Wav => "audio/wav",
            ContentFormat::Flac => "audio/flac",
            ContentFormat::BinaryModel => "model/x-rbxm",
            ContentFormat::XmlModel => "model/x-rbxmx",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentFormat::Png => "png",
            ContentFormat::Jpeg => "jpg",
            ContentFormat::Bmp => "bmp",
            ContentFormat::Gif => "gif",
            ContentFormat::Mp3 => "mp3",
            ContentFormat::Ogg => "ogg",
            ContentFormat::Wav => "wav",
            ContentFormat::Flac => "flac",
            ContentFormat::BinaryModel => "rbxm",
            ContentFormat::XmlModel => "rbxmx",
        }
    }

    fn accepted_for(&self, kind: AssetKind) -> bool {
        use ContentFormat::*;
        match kind {
            AssetKind::Image | AssetKind::Decal => matches!(self, Png | Jpeg | Bmp | Gif),
            AssetKind::Audio => matches!(self, Mp3 | Ogg | Wav | Flac),
            AssetKind::Model => matches!(self, BinaryModel | XmlModel),
        }
    }
}

/// Sniff the container format from leading magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ContentFormat> {
    let starts = |magic: &[u8]| bytes.starts_with(magic);
    if starts(b"\x89PNG\r\n\x1a\n") {
        Some(ContentFormat::Png)
    } else if starts(&[0xFF, 0xD8, 0xFF]) {
        Some(ContentFormat::Jpeg)
    } else if starts(b"BM") && bytes.len() > 14 {
        Some(ContentFormat::Bmp)
    } else if starts(b"GIF87a") || starts(b"GIF89a") {
        Some(ContentFormat::Gif)
    } else if starts(b"ID3") || (bytes.len() > 1 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        Some(ContentFormat::Mp3)
    } else if starts(b"OggS") {
        Some(ContentFormat::Ogg)
    } else if starts(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WAVE" {
        Some(ContentFormat::Wav)
    } else if starts(b"fLaC") {
        Some(ContentFormat::Flac)
    } else if starts(b"<roblox!") {
        Some(ContentFormat::BinaryModel)
    } else if starts(b"<roblox") {
        Some(ContentFormat::XmlModel)
    } else {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub max_image_bytes: usize,
    pub max_audio_bytes: usize,
    pub max_model_bytes: usize,
    pub max_name_chars: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_image_bytes: 20 * 1024 * 1024,
            max_audio_bytes: 20 * 1024 * 1024,
            max_model_bytes: 50 * 1024 * 1024,
            max_name_chars: 50,
        }
    }
}

impl ValidationRules {
    pub fn max_bytes_for(&self, kind: AssetKind) -> usize {
        match kind {
            AssetKind::Image | AssetKind::Decal => self.max_image_bytes,
            AssetKind::Audio => self.max_audio_bytes,
            AssetKind::Model => self.max_model_bytes,
        }
    }

    /// Returns the detected format when the request passes every check.
    pub fn validate(&self, request: &UploadRequest) -> Result<ContentFormat> {
        let name = request.display_name().trim();
        if name.is_empty() {
            return Err(IngestError::Validation("display name is empty".into()));
        }
        if name.chars().count() > self.max_name_chars {
            return Err(IngestError::Validation(format!(
                "display name exceeds {} characters",
                self.max_name_chars
            )));
        }
        if request.size_bytes() == 0 {
            return Err(IngestError::Validation("content is empty".into()));
        }
        let max = self.max_bytes_for(request.asset_kind());
        if request.size_bytes() > max {
            return Err(IngestError::Validation(format!(
                "{} content is {} bytes, limit is {}",
                request.asset_kind(),
                request.size_bytes(),
                max
            )));
        }
        let format = detect_format(request.content_bytes()).ok_or_else(|| {
            IngestError::Validation("unrecognized content format".into())
        })?;
        if !format.accepted_for(request.asset_kind()) {
            return Err(IngestError::Validation(format!(
                "{} is not accepted for {} assets",
                format.mime_type(),
                request.asset_kind()
            )));
        }
        Ok(format)
    }
}
