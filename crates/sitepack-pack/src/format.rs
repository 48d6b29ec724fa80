//! Binary format definitions for installer payloads.
//!
//! The footer is appended after the template executable and never touches
//! the template bytes. All integers are little-endian.
//!
//! ```text
//! offset from EOF   field             size
//! -8                trailing marker   8   "APPDATA\0"
//! -12               archive_len       4   u32 LE
//! -(12+N)           archive           N   zip payload
//! -(20+N)           leading marker    8   "APPDATA\0"
//! ```

use serde::{Deserialize, Serialize};

/// Sentinel written on both sides of the payload archive.
pub const MAGIC: &[u8; 8] = b"APPDATA\0";

/// Size of each marker in bytes.
pub const MARKER_SIZE: usize = 8;

/// Size of the archive length field in bytes.
pub const LENGTH_SIZE: usize = 4;

/// Bytes the footer adds on top of the archive itself.
pub const FOOTER_OVERHEAD: usize = MARKER_SIZE + LENGTH_SIZE + MARKER_SIZE;

/// Templates smaller than this trigger a warning when packaging.
///
/// A self-contained runtime image is normally well above this size, so a
/// tiny template usually means the wrong file was passed.
pub const DEFAULT_MIN_TEMPLATE_SIZE: u64 = 10 * 1024 * 1024;

/// Position of a validated payload inside an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterLocation {
    /// Total length of the image file.
    pub file_len: u64,
    /// Offset of the first archive byte.
    pub archive_offset: u64,
    /// Archive length as stored in the footer.
    pub archive_len: u32,
}

impl FooterLocation {
    /// Compute the payload position for a stored length.
    ///
    /// Returns `None` unless `0 < archive_len <= file_len - 20`.
    pub fn new(file_len: u64, archive_len: u32) -> Option<Self> {
        let overhead = FOOTER_OVERHEAD as u64;
        if archive_len == 0 || file_len < overhead {
            return None;
        }
        if u64::from(archive_len) > file_len - overhead {
            return None;
        }
        let archive_offset = file_len - (LENGTH_SIZE + MARKER_SIZE) as u64 - u64::from(archive_len);
        Some(Self {
            file_len,
            archive_offset,
            archive_len,
        })
    }

    /// Offset of the leading marker.
    pub fn leading_marker_offset(&self) -> u64 {
        self.archive_offset - MARKER_SIZE as u64
    }

    /// Number of template bytes before the leading marker.
    pub fn template_len(&self) -> u64 {
        self.leading_marker_offset()
    }
}

/// Encode the bytes that follow the archive: length then trailing marker.
pub fn encode_trailer(archive_len: u32) -> [u8; LENGTH_SIZE + MARKER_SIZE] {
    let mut buf = [0u8; LENGTH_SIZE + MARKER_SIZE];
    buf[..LENGTH_SIZE].copy_from_slice(&archive_len.to_le_bytes());
    buf[LENGTH_SIZE..].copy_from_slice(MAGIC);
    buf
}

/// Product identity stored in the archive comment.
///
/// Kept outside the entry list so the extracted tree is exactly the
/// source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Stable identifier used for upgrade and uninstall lookups.
    pub product_code: String,
    /// Human readable name.
    pub display_name: String,
    /// Application version string.
    pub version: String,
}

impl ProductInfo {
    /// Create product info.
    pub fn new(
        product_code: impl Into<String>,
        display_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            display_name: display_name.into(),
            version: version.into(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        // Only string fields, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse from JSON, `None` for anything that isn't product info.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}
