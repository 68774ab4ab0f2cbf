use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Suffix inserted before the extension of obfuscated renditions
pub const BLURRED_SUFFIX: &str = "blurred";
/// Extension of the placeholder key used for private videos
pub const WITHHELD_EXTENSION: &str = "withheld";

/// Kind of stored media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    /// MIME family uploads of this kind must declare
    pub fn expected_family(&self) -> &'static str {
        match self {
            MediaKind::Photo => "image/*",
            MediaKind::Video => "video/*",
        }
    }

    /// Whether a declared MIME type belongs to this kind's family
    pub fn accepts(&self, declared: &str) -> bool {
        let prefix = match self {
            MediaKind::Photo => "image/",
            MediaKind::Video => "video/",
        };
        let declared = declared.trim().to_ascii_lowercase();
        declared.len() > prefix.len() && declared.starts_with(prefix)
    }

    pub(crate) fn directory(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photos",
            MediaKind::Video => "videos",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" | "photos" => Ok(MediaKind::Photo),
            "video" | "videos" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// Stored asset metadata.
///
/// `private_storage_path` must never leave the service; API layers convert
/// this into a response type that drops it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Shared identifier of every rendition
    pub id: Uuid,
    /// Owning model profile
    pub owner_id: Uuid,
    pub kind: MediaKind,
    /// Servable rendition (blurred if private)
    pub storage_path: String,
    /// Unobfuscated original, only for private assets
    pub private_storage_path: Option<String>,
    pub is_private: bool,
    /// Free-text description used for request matching
    pub keywords: String,
    /// MIME type of the stored original
    pub content_type: String,
    /// Size of the stored original in bytes
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl MediaAsset {
    /// Check the partition invariant: a private asset has a distinct private
    /// path, a public asset has none.
    pub fn partition_invariant_holds(&self) -> bool {
        match (&self.private_storage_path, self.is_private) {
            (Some(private), true) => private != &self.storage_path,
            (None, false) => true,
            _ => false,
        }
    }
}

/// Fields an operator may change after upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub is_private: Option<bool>,
    pub keywords: Option<String>,
}

// Key layout, one shared id per asset:
//
//   public partition                    private partition
//   photos/{owner}/{id}.{ext}           photos/{owner}/{id}.{ext}
//   photos/{owner}/{id}.blurred.jpg     videos/{owner}/{id}.{ext}
//   videos/{owner}/{id}.{ext}
//
// A private video has no public blob; its storage_path is a `.withheld` key
// that is never written.

/// Key of an asset's original in whichever partition holds it
pub fn original_key(kind: MediaKind, owner_id: Uuid, id: Uuid, content_type: &str) -> String {
    format!(
        "{dir}/{owner}/{id}.{ext}",
        dir = kind.directory(),
        owner = sanitize_path_component(&owner_id.to_string()),
        id = id,
        ext = extension_for(content_type)
    )
}

/// Key of a photo's blurred rendition in the public partition
pub fn blurred_key(kind: MediaKind, owner_id: Uuid, id: Uuid) -> String {
    format!(
        "{dir}/{owner}/{id}.{BLURRED_SUFFIX}.jpg",
        dir = kind.directory(),
        owner = sanitize_path_component(&owner_id.to_string()),
        id = id,
    )
}

/// Placeholder key recorded as the servable path of a private video
pub fn withheld_key(kind: MediaKind, owner_id: Uuid, id: Uuid) -> String {
    format!(
        "{dir}/{owner}/{id}.{WITHHELD_EXTENSION}",
        dir = kind.directory(),
        owner = sanitize_path_component(&owner_id.to_string()),
        id = id,
    )
}

/// Whether a key is a withheld placeholder with no blob behind it
pub fn is_withheld_key(key: &str) -> bool {
    key.ends_with(&format!(".{WITHHELD_EXTENSION}"))
}

/// Recover the shared asset id from any storage key
pub fn asset_id_from_key(key: &str) -> Option<Uuid> {
    let file_name = key.rsplit('/').next()?;
    let stem = file_name.split('.').next()?;
    Uuid::parse_str(stem).ok()
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// File extension for a stored content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/heic" => "heic",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}
