//! Data models
//!
//! Storable records for every cached content type, plus the key and
//! schema vocabulary the local stores are built on.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Address
// =============================================================================

/// An account address on the hosting service (e.g. "alice")
///
/// Normalized on construction: trimmed, leading `@` removed, lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        Self(trimmed.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Keys and Schema
// =============================================================================

/// Every entity kind the local stores know about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Status,
    Purl,
    Paste,
    Pic,
    WeblogEntry,
    NowPage,
    WebPage,
    MutedAddress,
    MutedKeyword,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Purl => "purl",
            Self::Paste => "paste",
            Self::Pic => "pic",
            Self::WeblogEntry => "weblog_entry",
            Self::NowPage => "now_page",
            Self::WebPage => "web_page",
            Self::MutedAddress => "muted_address",
            Self::MutedKeyword => "muted_keyword",
        }
    }
}

/// Uniqueness key of a cached entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    Single(String),
    Composite(String, String),
}

impl StoreKey {
    pub fn single(value: impl Into<String>) -> Self {
        Self::Single(value.into())
    }

    pub fn composite(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::Composite(first.into(), second.into())
    }
}

/// Unit separator; cannot appear in addresses or remote identifiers.
const KEY_SEPARATOR: char = '\u{1f}';

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => f.write_str(value),
            Self::Composite(first, second) => write!(f, "{first}{KEY_SEPARATOR}{second}"),
        }
    }
}

/// Retention ceiling: at most `ceiling` entities per grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub ceiling: usize,
}

/// Schema declaration of one entity kind
#[derive(Debug, Clone, Copy)]
pub struct StoreSchema {
    /// Names of the fields forming the uniqueness key
    pub key_fields: &'static [&'static str],
    /// Optional retention ceiling per `Storable::group`
    pub retention: Option<Retention>,
}

/// A record that can live in a local store
pub trait Storable:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: EntityKind;
    const SCHEMA: StoreSchema;

    fn key(&self) -> StoreKey;

    /// Grouping key used by the retention ceiling
    fn group(&self) -> Option<String> {
        None
    }

    /// Recency of the record; `None` sorts as oldest
    fn timestamp(&self) -> Option<DateTime<Utc>>;
}

/// Persisted representation inside a local store
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity<R: Storable> {
    pub key: StoreKey,
    pub group: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub record: R,
}

impl<R: Storable> CachedEntity<R> {
    pub fn from_record(record: R) -> Self {
        Self {
            key: record.key(),
            group: record.group(),
            timestamp: record.timestamp(),
            record,
        }
    }
}

// =============================================================================
// Timeline
// =============================================================================

/// A status post from the statuslog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub emoji: Option<String>,
    pub content: String,
    pub external_url: Option<String>,
}

impl Storable for StatusRecord {
    const KIND: EntityKind = EntityKind::Status;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["id"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::single(&self.id)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

// =============================================================================
// Bookmarks (PURLs)
// =============================================================================

/// A persistent URL redirect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurlRecord {
    pub address: Address,
    pub name: String,
    pub url: String,
    pub counter: Option<u64>,
    pub listed: bool,
}

impl Storable for PurlRecord {
    const KIND: EntityKind = EntityKind::Purl;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address", "name"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::composite(self.address.as_str(), &self.name)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }
}

// =============================================================================
// Pastes
// =============================================================================

/// A pastebin entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasteRecord {
    pub address: Address,
    pub title: String,
    pub content: String,
    pub modified_at: DateTime<Utc>,
    pub listed: bool,
}

impl Storable for PasteRecord {
    const KIND: EntityKind = EntityKind::Paste;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address", "title"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::composite(self.address.as_str(), &self.title)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.modified_at)
    }
}

// =============================================================================
// Pictures
// =============================================================================

/// An uploaded picture and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicRecord {
    pub address: Address,
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub hidden: bool,
}

impl Storable for PicRecord {
    const KIND: EntityKind = EntityKind::Pic;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address", "id"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::composite(self.address.as_str(), &self.id)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

// =============================================================================
// Weblog
// =============================================================================

/// A blog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeblogEntryRecord {
    pub address: Address,
    pub entry_id: String,
    pub title: String,
    pub location: String,
    pub status: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
}

impl Storable for WeblogEntryRecord {
    const KIND: EntityKind = EntityKind::WeblogEntry;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address", "entry_id"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::composite(self.address.as_str(), &self.entry_id)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.published_at)
    }
}

// =============================================================================
// Now page (latest per author)
// =============================================================================

/// The "now" status page of an address; only the latest version is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPageRecord {
    pub address: Address,
    pub content: String,
    pub updated_at: DateTime<Utc>,
    pub listed: bool,
}

impl Storable for NowPageRecord {
    const KIND: EntityKind = EntityKind::NowPage;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address"],
        retention: Some(Retention { ceiling: 1 }),
    };

    fn key(&self) -> StoreKey {
        StoreKey::single(self.address.as_str())
    }

    fn group(&self) -> Option<String> {
        Some(self.address.to_string())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

// =============================================================================
// Web page (versioned history)
// =============================================================================

/// One version of the profile web page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPageRecord {
    pub address: Address,
    pub content: String,
    pub modified_at: DateTime<Utc>,
    pub published: bool,
}

/// Versions of the web page kept per address
pub const WEB_PAGE_HISTORY: usize = 3;

impl Storable for WebPageRecord {
    const KIND: EntityKind = EntityKind::WebPage;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address", "modified_at"],
        retention: Some(Retention {
            ceiling: WEB_PAGE_HISTORY,
        }),
    };

    fn key(&self) -> StoreKey {
        StoreKey::composite(
            self.address.as_str(),
            self.modified_at.timestamp().to_string(),
        )
    }

    fn group(&self) -> Option<String> {
        Some(self.address.to_string())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.modified_at)
    }
}

// =============================================================================
// Mute rules
// =============================================================================

/// A muted author address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutedAddressRecord {
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

impl Storable for MutedAddressRecord {
    const KIND: EntityKind = EntityKind::MutedAddress;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["address"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::single(self.address.as_str())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

/// A muted keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutedKeywordRecord {
    pub keyword: String,
    pub created_at: DateTime<Utc>,
}

impl Storable for MutedKeywordRecord {
    const KIND: EntityKind = EntityKind::MutedKeyword;
    const SCHEMA: StoreSchema = StoreSchema {
        key_fields: &["keyword"],
        retention: None,
    };

    fn key(&self) -> StoreKey {
        StoreKey::single(&self.keyword)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}
