//! Screenshot payload inspection and normalization.
//!
//! Agents upload images as base64 text, sometimes already wrapped in a
//! `data:image/<fmt>;base64,` marker and sometimes bare. Before a payload
//! leaves the service it is normalized to the marked form, inferring the
//! format from the decoded signature bytes when the marker is missing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

/// Leading marker of a data URL.
const DATA_URL_SCHEME: &str = "data:";

/// Number of base64 characters decoded to read a signature (18 bytes, enough
/// for the `RIFF....WEBP` header).
const SIGNATURE_CHARS: usize = 24;

/// Image formats the monitoring agents are known to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    WebP,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Detect a format from raw image bytes.
    pub fn from_signature(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }

    /// Data-URL prefix for this format.
    pub fn data_url_prefix(self) -> String {
        format!("{DATA_URL_SCHEME}{};base64,", self.mime())
    }
}

/// Whether the payload already carries a `data:` format marker.
pub fn has_format_marker(payload: &str) -> bool {
    payload.trim_start().starts_with(DATA_URL_SCHEME)
}

/// Split a marked payload into `(mime, base64 body)`.
fn split_marker(payload: &str) -> Option<(&str, &str)> {
    let rest = payload.trim_start().strip_prefix(DATA_URL_SCHEME)?;
    let (header, body) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, body))
}

/// Infer the image format of a bare base64 payload from its first bytes.
pub fn sniff_format(payload: &str) -> Option<ImageFormat> {
    let body = payload.trim();
    let head = if body.len() > SIGNATURE_CHARS {
        body.get(..SIGNATURE_CHARS)?
    } else {
        body
    };
    let bytes = STANDARD.decode(head).ok()?;
    ImageFormat::from_signature(&bytes)
}

/// Return the canonical (marked) representation of a payload.
///
/// Payloads that already carry a marker are returned unchanged. Bare
/// payloads get the marker of their sniffed format, defaulting to PNG when
/// the signature is not one of the known formats. Empty payloads stay empty.
pub fn normalize_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.is_empty() || has_format_marker(trimmed) {
        return trimmed.to_string();
    }
    let format = sniff_format(trimmed).unwrap_or(ImageFormat::Png);
    format!("{}{trimmed}", format.data_url_prefix())
}

/// Validate that a payload decodes, returning its format.
///
/// Undecodable base64 and broken markers are errors and cause the sample to
/// be quarantined. A decodable payload with an unknown signature is accepted
/// as PNG, matching [`normalize_payload`].
pub fn check_payload(payload: &str) -> Result<ImageFormat, String> {
    let body = match split_marker(payload) {
        Some((_mime, body)) => body,
        None if has_format_marker(payload) => return Err("malformed data URL marker".into()),
        None => payload,
    };
    let bytes = STANDARD
        .decode(body.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    if bytes.is_empty() {
        return Err("empty image data".into());
    }
    Ok(ImageFormat::from_signature(&bytes).unwrap_or(ImageFormat::Png))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// A PNG signature followed by an IHDR chunk header.
    const PNG_BYTES: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R', 0, 0,
    ];
    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0, 1];
    const WEBP_BYTES: &[u8] = &[
        b'R', b'I', b'F', b'F', 0x24, 0, 0, 0, b'W', b'E', b'B', b'P', b'V', b'P', b'8', b' ',
    ];

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn sniffs_three_known_formats() {
        assert_eq!(sniff_format(&b64(PNG_BYTES)), Some(ImageFormat::Png));
        assert_eq!(sniff_format(&b64(JPEG_BYTES)), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_format(&b64(WEBP_BYTES)), Some(ImageFormat::WebP));
    }

    #[test]
    fn normalize_prefixes_bare_payload() {
        let bare = b64(JPEG_BYTES);
        let normalized = normalize_payload(&bare);
        assert_eq!(normalized, format!("data:image/jpeg;base64,{bare}"));
    }

    #[test]
    fn normalize_keeps_marked_payload() {
        let marked = format!("data:image/webp;base64,{}", b64(WEBP_BYTES));
        assert_eq!(normalize_payload(&marked), marked);
    }

    #[test]
    fn normalize_defaults_unknown_signature_to_png() {
        let bare = b64(b"not an image at all");
        assert!(normalize_payload(&bare).starts_with("data:image/png;base64,"));
    }

    #[test]
    fn normalize_leaves_empty_payload_empty() {
        assert_eq!(normalize_payload("   "), "");
    }

    #[test]
    fn check_accepts_marked_and_bare() {
        assert_eq!(check_payload(&b64(PNG_BYTES)), Ok(ImageFormat::Png));
        let marked = format!("data:image/png;base64,{}", b64(PNG_BYTES));
        assert_eq!(check_payload(&marked), Ok(ImageFormat::Png));
    }

    #[test]
    fn check_rejects_garbage() {
        assert!(check_payload("%%% not base64 %%%").is_err());
        assert!(check_payload("data:image/png,abc").is_err());
        assert!(check_payload("data:image/png;base64,").is_err());
    }

    #[test]
    fn check_accepts_unknown_signature_as_png() {
        assert_eq!(check_payload(&b64(b"plain text")), Ok(ImageFormat::Png));
    }
}
