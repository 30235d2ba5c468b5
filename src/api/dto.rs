//! Wire data transfer objects
//!
//! Remote records as the hosting service sends them, and the payloads
//! sent for create/update calls. Timestamps arrive as unix seconds (string
//! or number) or as RFC 3339 strings; boolean flags sometimes arrive as
//! `0`/`1` or `"true"`.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Timeline
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDto {
    pub id: String,
    pub address: String,
    #[serde(rename = "created", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub emoji: Option<String>,
    pub content: String,
    #[serde(default)]
    pub external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusList {
    pub statuses: Vec<StatusDto>,
}

#[derive(Debug, Deserialize)]
pub struct StatusEnvelope {
    pub status: StatusDto,
}

/// New status or replacement content of an existing one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusDraft {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

// =============================================================================
// Bookmarks (PURLs)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurlDto {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub counter: Option<u64>,
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub listed: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurlList {
    pub purls: Vec<PurlDto>,
}

#[derive(Debug, Deserialize)]
pub struct PurlEnvelope {
    pub purl: PurlDto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurlDraft {
    pub name: String,
    pub url: String,
    pub listed: bool,
}

// =============================================================================
// Pastes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasteDto {
    pub title: String,
    pub content: String,
    #[serde(rename = "modified_on", deserialize_with = "timestamp::deserialize")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub listed: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasteList {
    pub pastebin: Vec<PasteDto>,
}

#[derive(Debug, Deserialize)]
pub struct PasteEnvelope {
    pub paste: PasteDto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PasteDraft {
    pub title: String,
    pub content: String,
    pub listed: bool,
}

/// Replacement content of an existing paste; the title is the key
#[derive(Debug, Clone, PartialEq)]
pub struct PastePatch {
    pub content: String,
    pub listed: bool,
}

impl PastePatch {
    pub fn into_draft(self, title: &str) -> PasteDraft {
        PasteDraft {
            title: title.to_string(),
            content: self.content,
            listed: self.listed,
        }
    }
}

// =============================================================================
// Pictures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicDto {
    pub id: String,
    pub url: String,
    #[serde(rename = "created", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct PicList {
    pub pics: Vec<PicDto>,
}

#[derive(Debug, Deserialize)]
pub struct PicEnvelope {
    pub pic: PicDto,
}

/// Result of the raw upload step
#[derive(Debug, Deserialize)]
pub struct PicUploadResponse {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Raw upload body: the image bytes, base64-encoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PicUpload {
    pub pic: String,
}

impl PicUpload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            pic: general_purpose::STANDARD.encode(bytes),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Picture annotation
///
/// `hidden` is only ever sent when true.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PicMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub hidden: bool,
}

/// New picture: bytes to upload plus the annotation applied afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct PicDraft {
    pub bytes: Vec<u8>,
    pub metadata: PicMetadata,
}

// =============================================================================
// Weblog
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeblogEntryDto {
    #[serde(rename = "entry")]
    pub entry_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "date", deserialize_with = "timestamp::deserialize")]
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WeblogList {
    pub entries: Vec<WeblogEntryDto>,
}

#[derive(Debug, Deserialize)]
pub struct WeblogEnvelope {
    pub entry: WeblogEntryDto,
}

/// Raw weblog entry source, front matter included; sent as plain text
#[derive(Debug, Clone, PartialEq)]
pub struct WeblogDraft {
    pub content: String,
}

// =============================================================================
// Now page
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowDto {
    pub content: String,
    #[serde(rename = "updated", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub listed: bool,
}

#[derive(Debug, Deserialize)]
pub struct NowEnvelope {
    pub now: NowDto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowDraft {
    pub content: String,
    pub listed: bool,
}

// =============================================================================
// Web page
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDto {
    pub content: String,
    #[serde(rename = "modified", deserialize_with = "timestamp::deserialize")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebDraft {
    pub content: String,
    pub publish: bool,
}

// =============================================================================
// Lenient field decoders
// =============================================================================

mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => {
                from_seconds(seconds).ok_or_else(|| D::Error::custom("timestamp out of range"))
            }
            Raw::Text(text) => parse(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{text}'"))),
        }
    }

    fn from_seconds(seconds: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(seconds, 0)
    }

    pub(super) fn parse(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(seconds) = text.parse::<i64>() {
            return from_seconds(seconds);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(text) {
            return Some(at.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

mod flag {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Number(i64),
        Text(String),
        Null(()),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(value) => value,
            Raw::Number(value) => value != 0,
            Raw::Text(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            Raw::Null(()) => false,
        })
    }
}
