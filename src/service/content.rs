//! Content kinds
//!
//! A `ContentKind` ties together the wire record, the storable record,
//! the mutation payloads and the synchronization style of one feature.
//! Repositories, remote access and stores are all generic over it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::api::dto::{
    NowDraft, NowDto, PasteDraft, PasteDto, PastePatch, PicDraft, PicDto, PicMetadata, PurlDraft,
    PurlDto, StatusDraft, StatusDto, WebDraft, WebDto, WeblogDraft, WeblogEntryDto,
};
use crate::data::{
    Address, NowPageRecord, PasteRecord, PicRecord, PurlRecord, StatusRecord, Storable, StoreKey,
    WebPageRecord, WeblogEntryRecord,
};
use crate::error::AppError;

/// How a kind's cache is kept current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStyle {
    /// Recurring timer driven by the repository
    Poll,
    /// Batches arriving on the remote push channel
    Push,
    /// Only when a caller asks
    OnDemand,
}

pub trait ContentKind: Send + Sync + 'static {
    /// Label used in logs and metrics
    const NAME: &'static str;
    /// Whether fetches are scoped to the selected address
    const ADDRESS_SCOPED: bool;
    const SYNC: SyncStyle;

    type Remote: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Record: Storable;
    type Draft: Send + Sync + 'static;
    type Patch: Send + Sync + 'static;

    /// Convert a wire record; `owner` is the address the fetch was scoped to
    fn to_record(remote: Self::Remote, owner: Option<&Address>) -> Result<Self::Record, AppError>;

    /// Local key of the entity a remote identifier refers to
    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError>;
}

fn require_owner<'a>(owner: Option<&'a Address>, kind: &str) -> Result<&'a Address, AppError> {
    owner.ok_or_else(|| AppError::Validation(format!("{kind} records require an owning address")))
}

/// Service-wide status feed
pub struct Timeline;

impl ContentKind for Timeline {
    const NAME: &'static str = "timeline";
    const ADDRESS_SCOPED: bool = false;
    const SYNC: SyncStyle = SyncStyle::Poll;

    type Remote = StatusDto;
    type Record = StatusRecord;
    type Draft = StatusDraft;
    type Patch = StatusDraft;

    fn to_record(remote: StatusDto, _owner: Option<&Address>) -> Result<StatusRecord, AppError> {
        Ok(StatusRecord {
            id: remote.id,
            address: Address::new(remote.address),
            created_at: remote.created_at,
            emoji: remote.emoji,
            content: remote.content,
            external_url: remote.external_url,
        })
    }

    fn local_key(_owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::single(id))
    }
}

/// Persistent URLs
pub struct Bookmarks;

impl ContentKind for Bookmarks {
    const NAME: &'static str = "bookmarks";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::Push;

    type Remote = PurlDto;
    type Record = PurlRecord;
    type Draft = PurlDraft;
    type Patch = PurlDraft;

    fn to_record(remote: PurlDto, owner: Option<&Address>) -> Result<PurlRecord, AppError> {
        Ok(PurlRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            name: remote.name,
            url: remote.url,
            counter: remote.counter,
            listed: remote.listed,
        })
    }

    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::composite(require_owner(owner, Self::NAME)?.as_str(), id))
    }
}

/// Pastebin
pub struct Pastes;

impl ContentKind for Pastes {
    const NAME: &'static str = "pastes";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::Push;

    type Remote = PasteDto;
    type Record = PasteRecord;
    type Draft = PasteDraft;
    type Patch = PastePatch;

    fn to_record(remote: PasteDto, owner: Option<&Address>) -> Result<PasteRecord, AppError> {
        Ok(PasteRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            title: remote.title,
            content: remote.content,
            modified_at: remote.modified_at,
            listed: remote.listed,
        })
    }

    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::composite(require_owner(owner, Self::NAME)?.as_str(), id))
    }
}

/// Picture hosting
pub struct Pictures;

impl ContentKind for Pictures {
    const NAME: &'static str = "pictures";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::Push;

    type Remote = PicDto;
    type Record = PicRecord;
    type Draft = PicDraft;
    type Patch = PicMetadata;

    fn to_record(remote: PicDto, owner: Option<&Address>) -> Result<PicRecord, AppError> {
        Ok(PicRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            id: remote.id,
            url: remote.url,
            created_at: remote.created_at,
            size: remote.size,
            mime: remote.mime,
            description: remote.description,
            tags: remote.tags,
            hidden: remote.hidden,
        })
    }

    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::composite(require_owner(owner, Self::NAME)?.as_str(), id))
    }
}

/// Blog entries
pub struct Weblog;

impl ContentKind for Weblog {
    const NAME: &'static str = "weblog";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::OnDemand;

    type Remote = WeblogEntryDto;
    type Record = WeblogEntryRecord;
    type Draft = WeblogDraft;
    type Patch = WeblogDraft;

    fn to_record(
        remote: WeblogEntryDto,
        owner: Option<&Address>,
    ) -> Result<WeblogEntryRecord, AppError> {
        Ok(WeblogEntryRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            entry_id: remote.entry_id,
            title: remote.title,
            location: remote.location,
            status: remote.status,
            published_at: remote.published_at,
            body: remote.body,
        })
    }

    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::composite(require_owner(owner, Self::NAME)?.as_str(), id))
    }
}

/// The "now" page; one per address
pub struct NowPage;

impl ContentKind for NowPage {
    const NAME: &'static str = "now_page";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::OnDemand;

    type Remote = NowDto;
    type Record = NowPageRecord;
    type Draft = NowDraft;
    type Patch = NowDraft;

    fn to_record(remote: NowDto, owner: Option<&Address>) -> Result<NowPageRecord, AppError> {
        Ok(NowPageRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            content: remote.content,
            updated_at: remote.updated_at,
            listed: remote.listed,
        })
    }

    fn local_key(owner: Option<&Address>, _id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::single(require_owner(owner, Self::NAME)?.as_str()))
    }
}

/// The profile web page and its recent versions
pub struct WebPage;

impl ContentKind for WebPage {
    const NAME: &'static str = "web_page";
    const ADDRESS_SCOPED: bool = true;
    const SYNC: SyncStyle = SyncStyle::OnDemand;

    type Remote = WebDto;
    type Record = WebPageRecord;
    type Draft = WebDraft;
    type Patch = WebDraft;

    fn to_record(remote: WebDto, owner: Option<&Address>) -> Result<WebPageRecord, AppError> {
        Ok(WebPageRecord {
            address: require_owner(owner, Self::NAME)?.clone(),
            content: remote.content,
            modified_at: remote.modified_at,
            published: remote.published,
        })
    }

    /// `id` is the version's modification time in unix seconds
    fn local_key(owner: Option<&Address>, id: &str) -> Result<StoreKey, AppError> {
        Ok(StoreKey::composite(require_owner(owner, Self::NAME)?.as_str(), id))
    }
}
