//! Endpoint bindings
//!
//! `RemoteAccess` implementations of `ApiClient` for every content kind.
//! Endpoints that acknowledge a write without echoing the record are
//! followed by a read of the written record.

use async_trait::async_trait;
use std::borrow::Cow;
use tokio::sync::mpsc;

use super::client::{ApiClient, ApiRequest};
use super::dto::{
    NowDraft, NowDto, NowEnvelope, PasteDraft, PasteDto, PasteEnvelope, PasteList, PastePatch,
    PicDraft, PicDto, PicEnvelope, PicList, PicMetadata, PicUpload, PicUploadResponse, PurlDraft,
    PurlDto, PurlEnvelope, PurlList, StatusDraft, StatusDto, StatusEnvelope, StatusList, WebDraft,
    WebDto, WeblogDraft, WeblogEntryDto, WeblogEnvelope, WeblogList,
};
use super::remote::{Credentials, FetchScope, RemoteAccess};
use super::updates::spawn_list_watcher;
use crate::data::Address;
use crate::error::AppError;
use crate::service::{
    Bookmarks, ContentKind, NowPage, Pastes, Pictures, Timeline, WebPage, Weblog,
};

/// Path segment, percent-encoded
fn segment(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

fn address_path(address: &Address, rest: &str) -> String {
    format!("/address/{}/{}", segment(address.as_str()), rest)
}

fn scoped<'a, K: ContentKind>(scope: &'a FetchScope) -> Result<&'a Address, AppError> {
    scope.address().ok_or_else(|| {
        AppError::Validation(format!("{} can only be fetched for an address", K::NAME))
    })
}

/// Treat a missing singleton page as an empty list
fn optional<T>(result: Result<T, AppError>) -> Result<Vec<T>, AppError> {
    match result {
        Ok(value) => Ok(vec![value]),
        Err(AppError::NotFound) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

impl ApiClient {
    fn watch_list<K>(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> mpsc::Receiver<Vec<K::Remote>>
    where
        K: ContentKind,
        ApiClient: RemoteAccess<K>,
    {
        let client = self.clone();
        let scope = FetchScope::Address(address.clone());
        let credentials = credentials.clone();

        spawn_list_watcher(K::NAME, address.clone(), self.updates_interval(), move || {
            let client = client.clone();
            let scope = scope.clone();
            let credentials = credentials.clone();
            async move { RemoteAccess::<K>::fetch(&client, &scope, &credentials).await }
        })
    }
}

// =============================================================================
// Timeline
// =============================================================================

#[async_trait]
impl RemoteAccess<Timeline> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<StatusDto>, AppError> {
        let request = match scope {
            FetchScope::Everyone => ApiRequest::get("/statuslog/latest"),
            FetchScope::Address(address) => ApiRequest::get(address_path(address, "statuses")),
        };
        let list: StatusList = self.send(request, credentials).await?;
        Ok(list.statuses)
    }

    async fn create(
        &self,
        address: &Address,
        draft: StatusDraft,
        credentials: &Credentials,
    ) -> Result<StatusDto, AppError> {
        let request = ApiRequest::post(address_path(address, "statuses")).json(&draft)?;
        let created: StatusEnvelope = self.send(request, credentials).await?;
        Ok(created.status)
    }

    async fn update(
        &self,
        address: &Address,
        id: &str,
        patch: StatusDraft,
        credentials: &Credentials,
    ) -> Result<StatusDto, AppError> {
        let path = address_path(address, &format!("statuses/{}", segment(id)));
        let updated: StatusEnvelope = self
            .send(ApiRequest::put(path).json(&patch)?, credentials)
            .await?;
        Ok(updated.status)
    }

    async fn delete(
        &self,
        address: &Address,
        id: &str,
        credentials: &Credentials,
    ) -> Result<(), AppError> {
        let path = address_path(address, &format!("statuses/{}", segment(id)));
        self.send::<serde_json::Value>(ApiRequest::delete(path), credentials)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Bookmarks
// =============================================================================

impl ApiClient {
    async fn read_purl(
        &self,
        address: &Address,
        name: &str,
        credentials: &Credentials,
    ) -> Result<PurlDto, AppError> {
        let path = address_path(address, &format!("purl/{}", segment(name)));
        let envelope: PurlEnvelope = self.send(ApiRequest::get(path), credentials).await?;
        Ok(envelope.purl)
    }
}

#[async_trait]
impl RemoteAccess<Bookmarks> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<PurlDto>, AppError> {
        let address = scoped::<Bookmarks>(scope)?;
        let list: PurlList = self
            .send(ApiRequest::get(address_path(address, "purls")), credentials)
            .await?;
        Ok(list.purls)
    }

    async fn create(
        &self,
        address: &Address,
        draft: PurlDraft,
        credentials: &Credentials,
    ) -> Result<PurlDto, AppError> {
        let request = ApiRequest::post(address_path(address, "purl")).json(&draft)?;
        self.send::<serde_json::Value>(request, credentials).await?;
        self.read_purl(address, &draft.name, credentials).await
    }

    async fn delete(
        &self,
        address: &Address,
        name: &str,
        credentials: &Credentials,
    ) -> Result<(), AppError> {
        let path = address_path(address, &format!("purl/{}", segment(name)));
        self.send::<serde_json::Value>(ApiRequest::delete(path), credentials)
            .await?;
        Ok(())
    }

    fn updates(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Option<mpsc::Receiver<Vec<PurlDto>>> {
        Some(self.watch_list::<Bookmarks>(address, credentials))
    }
}

// =============================================================================
// Pastes
// =============================================================================

impl ApiClient {
    async fn write_paste(
        &self,
        address: &Address,
        draft: &PasteDraft,
        credentials: &Credentials,
    ) -> Result<PasteDto, AppError> {
        let request = ApiRequest::post(address_path(address, "pastebin")).json(draft)?;
        self.send::<serde_json::Value>(request, credentials).await?;

        let path = address_path(address, &format!("pastebin/{}", segment(&draft.title)));
        let envelope: PasteEnvelope = self.send(ApiRequest::get(path), credentials).await?;
        Ok(envelope.paste)
    }
}

#[async_trait]
impl RemoteAccess<Pastes> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<PasteDto>, AppError> {
        let address = scoped::<Pastes>(scope)?;
        let list: PasteList = self
            .send(ApiRequest::get(address_path(address, "pastebin")), credentials)
            .await?;
        Ok(list.pastebin)
    }

    async fn create(
        &self,
        address: &Address,
        draft: PasteDraft,
        credentials: &Credentials,
    ) -> Result<PasteDto, AppError> {
        self.write_paste(address, &draft, credentials).await
    }

    async fn update(
        &self,
        address: &Address,
        title: &str,
        patch: PastePatch,
        credentials: &Credentials,
    ) -> Result<PasteDto, AppError> {
        self.write_paste(address, &patch.into_draft(title), credentials)
            .await
    }

    async fn delete(
        &self,
        address: &Address,
        title: &str,
        credentials: &Credentials,
    ) -> Result<(), AppError> {
        let path = address_path(address, &format!("pastebin/{}", segment(title)));
        self.send::<serde_json::Value>(ApiRequest::delete(path), credentials)
            .await?;
        Ok(())
    }

    fn updates(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Option<mpsc::Receiver<Vec<PasteDto>>> {
        Some(self.watch_list::<Pastes>(address, credentials))
    }
}

// =============================================================================
// Pictures
// =============================================================================

impl ApiClient {
    async fn annotate_pic(
        &self,
        address: &Address,
        id: &str,
        metadata: &PicMetadata,
        credentials: &Credentials,
    ) -> Result<PicDto, AppError> {
        let path = address_path(address, &format!("pics/{}", segment(id)));
        let envelope: PicEnvelope = self
            .send(ApiRequest::put(path).json(metadata)?, credentials)
            .await?;
        Ok(envelope.pic)
    }
}

#[async_trait]
impl RemoteAccess<Pictures> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<PicDto>, AppError> {
        let address = scoped::<Pictures>(scope)?;
        let list: PicList = self
            .send(ApiRequest::get(address_path(address, "pics")), credentials)
            .await?;
        Ok(list.pics)
    }

    /// Upload, then annotate
    ///
    /// When annotation fails the uploaded picture is deleted again, best
    /// effort, and the annotation error is returned.
    async fn create(
        &self,
        address: &Address,
        draft: PicDraft,
        credentials: &Credentials,
    ) -> Result<PicDto, AppError> {
        let request = ApiRequest::post(address_path(address, "pics/upload"))
            .json(&PicUpload::from_bytes(&draft.bytes))?;
        let uploaded: PicUploadResponse = self.send(request, credentials).await?;

        match self
            .annotate_pic(address, &uploaded.id, &draft.metadata, credentials)
            .await
        {
            Ok(pic) => Ok(pic),
            Err(e) => {
                tracing::warn!(
                    address = %address,
                    pic = %uploaded.id,
                    error = %e,
                    "Picture annotation failed, removing upload"
                );
                if let Err(cleanup) =
                    RemoteAccess::<Pictures>::delete(self, address, &uploaded.id, credentials).await
                {
                    tracing::error!(
                        address = %address,
                        pic = %uploaded.id,
                        error = %cleanup,
                        "Failed to remove unannotated picture"
                    );
                }
                Err(e)
            }
        }
    }

    async fn update(
        &self,
        address: &Address,
        id: &str,
        patch: PicMetadata,
        credentials: &Credentials,
    ) -> Result<PicDto, AppError> {
        self.annotate_pic(address, id, &patch, credentials).await
    }

    async fn delete(
        &self,
        address: &Address,
        id: &str,
        credentials: &Credentials,
    ) -> Result<(), AppError> {
        let path = address_path(address, &format!("pics/{}", segment(id)));
        self.send::<serde_json::Value>(ApiRequest::delete(path), credentials)
            .await?;
        Ok(())
    }

    fn updates(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Option<mpsc::Receiver<Vec<PicDto>>> {
        Some(self.watch_list::<Pictures>(address, credentials))
    }
}

// =============================================================================
// Weblog
// =============================================================================

#[async_trait]
impl RemoteAccess<Weblog> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<WeblogEntryDto>, AppError> {
        let address = scoped::<Weblog>(scope)?;
        let list: WeblogList = self
            .send(
                ApiRequest::get(address_path(address, "weblog/entries")),
                credentials,
            )
            .await?;
        Ok(list.entries)
    }

    async fn create(
        &self,
        address: &Address,
        draft: WeblogDraft,
        credentials: &Credentials,
    ) -> Result<WeblogEntryDto, AppError> {
        let request = ApiRequest::post(address_path(address, "weblog/entry")).text(draft.content);
        let envelope: WeblogEnvelope = self.send(request, credentials).await?;
        Ok(envelope.entry)
    }

    async fn update(
        &self,
        address: &Address,
        id: &str,
        patch: WeblogDraft,
        credentials: &Credentials,
    ) -> Result<WeblogEntryDto, AppError> {
        let path = address_path(address, &format!("weblog/entry/{}", segment(id)));
        let envelope: WeblogEnvelope = self
            .send(ApiRequest::put(path).text(patch.content), credentials)
            .await?;
        Ok(envelope.entry)
    }

    async fn delete(
        &self,
        address: &Address,
        id: &str,
        credentials: &Credentials,
    ) -> Result<(), AppError> {
        let path = address_path(address, &format!("weblog/delete/{}", segment(id)));
        self.send::<serde_json::Value>(ApiRequest::delete(path), credentials)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Now page
// =============================================================================

impl ApiClient {
    async fn read_now(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Result<NowDto, AppError> {
        let envelope: NowEnvelope = self
            .send(ApiRequest::get(address_path(address, "now")), credentials)
            .await?;
        Ok(envelope.now)
    }
}

#[async_trait]
impl RemoteAccess<NowPage> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<NowDto>, AppError> {
        let address = scoped::<NowPage>(scope)?;
        optional(self.read_now(address, credentials).await)
    }

    async fn update(
        &self,
        address: &Address,
        _id: &str,
        patch: NowDraft,
        credentials: &Credentials,
    ) -> Result<NowDto, AppError> {
        let request = ApiRequest::post(address_path(address, "now")).json(&patch)?;
        self.send::<serde_json::Value>(request, credentials).await?;
        self.read_now(address, credentials).await
    }
}

// =============================================================================
// Web page
// =============================================================================

impl ApiClient {
    async fn read_web(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Result<WebDto, AppError> {
        self.send(ApiRequest::get(address_path(address, "web")), credentials)
            .await
    }
}

#[async_trait]
impl RemoteAccess<WebPage> for ApiClient {
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<WebDto>, AppError> {
        let address = scoped::<WebPage>(scope)?;
        optional(self.read_web(address, credentials).await)
    }

    async fn update(
        &self,
        address: &Address,
        _id: &str,
        patch: WebDraft,
        credentials: &Credentials,
    ) -> Result<WebDto, AppError> {
        let request = ApiRequest::post(address_path(address, "web")).json(&patch)?;
        self.send::<serde_json::Value>(request, credentials).await?;
        self.read_web(address, credentials).await
    }
}
