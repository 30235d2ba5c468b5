//! Timeline service
//!
//! The status feed repository plus the local mute rules applied on top
//! of it. Mute and unmute are local store mutations: no remote call, but
//! gated on login like every other mutation. Rule changes are
//! serialized on the service's own lane.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::content::Timeline;
use super::filter::MuteRules;
use super::repository::{Outcome, Repository, SkipReason};
use crate::auth::SessionProvider;
use crate::data::{
    Address, LocalStore, MutedAddressRecord, MutedKeywordRecord, StatusRecord, StoreKey,
    WriteGuard,
};
use crate::error::AppError;
use crate::metrics::GATE_SKIPS_TOTAL;

/// Timeline service
pub struct TimelineService {
    session: Arc<dyn SessionProvider>,
    timeline: Arc<Repository<Timeline>>,
    muted_addresses: Arc<dyn LocalStore<MutedAddressRecord>>,
    muted_keywords: Arc<dyn LocalStore<MutedKeywordRecord>>,
    lane: Mutex<()>,
}

impl TimelineService {
    /// Create new timeline service
    pub fn new(
        session: Arc<dyn SessionProvider>,
        timeline: Arc<Repository<Timeline>>,
        muted_addresses: Arc<dyn LocalStore<MutedAddressRecord>>,
        muted_keywords: Arc<dyn LocalStore<MutedKeywordRecord>>,
    ) -> Self {
        Self {
            session,
            timeline,
            muted_addresses,
            muted_keywords,
            lane: Mutex::new(()),
        }
    }

    /// The underlying status repository
    pub fn repository(&self) -> &Arc<Repository<Timeline>> {
        &self.timeline
    }

    fn gate(&self, operation: &'static str) -> Result<WriteGuard, SkipReason> {
        let guard = self.session.write_guard();
        if self.session.is_logged_in() {
            return Ok(guard);
        }
        Err(Self::skipped(operation))
    }

    fn skipped(operation: &'static str) -> SkipReason {
        GATE_SKIPS_TOTAL
            .with_label_values(&["mute_rules", SkipReason::NotLoggedIn.as_str()])
            .inc();
        tracing::debug!(operation, "Mute rule change skipped");
        SkipReason::NotLoggedIn
    }

    /// Fetch the latest statuses into the cache
    pub async fn refresh(&self) -> Result<Outcome<usize>, AppError> {
        self.timeline.refresh().await
    }

    /// Cached statuses that pass the mute rules, newest first
    ///
    /// # Arguments
    /// * `limit` - Maximum results
    pub async fn visible_timeline(&self, limit: usize) -> Result<Vec<StatusRecord>, AppError> {
        let filter = self.mute_rules().await?.filter();

        Ok(self
            .timeline
            .cached()
            .await?
            .into_iter()
            .filter(|status| !filter.is_muted(status))
            .take(limit)
            .collect())
    }

    /// Current mute rules, newest first
    pub async fn mute_rules(&self) -> Result<MuteRules, AppError> {
        Ok(MuteRules {
            addresses: self.muted_addresses.all().await?,
            keywords: self.muted_keywords.all().await?,
        })
    }

    /// Mute an author
    ///
    /// Muting an already muted address returns the existing rule.
    pub async fn mute_address(
        &self,
        address: &str,
    ) -> Result<Outcome<MutedAddressRecord>, AppError> {
        let _lane = self.lane.lock().await;
        let guard = match self.gate("mute_address") {
            Ok(guard) => guard,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let address = Address::new(address);
        if address.is_empty() {
            return Err(AppError::Validation("address must not be empty".to_string()));
        }

        let key = StoreKey::single(address.as_str());
        if let Some(existing) = self.muted_addresses.get(&key).await? {
            return Ok(Outcome::Done(existing));
        }

        let rule = MutedAddressRecord {
            address,
            created_at: Utc::now(),
        };
        if !self
            .muted_addresses
            .upsert_guarded(vec![rule.clone()], &guard)
            .await?
        {
            return Ok(Outcome::Skipped(Self::skipped("mute_address")));
        }
        tracing::info!(address = %rule.address, "Address muted");
        Ok(Outcome::Done(rule))
    }

    /// Remove an author mute; `Done(false)` when it was not muted
    pub async fn unmute_address(&self, address: &str) -> Result<Outcome<bool>, AppError> {
        let _lane = self.lane.lock().await;
        if let Err(reason) = self.gate("unmute_address") {
            return Ok(Outcome::Skipped(reason));
        }

        let key = StoreKey::single(Address::new(address).as_str());
        if self.muted_addresses.get(&key).await?.is_none() {
            return Ok(Outcome::Done(false));
        }

        self.muted_addresses.delete(&key).await?;
        Ok(Outcome::Done(true))
    }

    /// Mute a keyword
    ///
    /// Keywords are trimmed and lowercased. Blank keywords are rejected;
    /// muting an already muted keyword returns the existing rule.
    pub async fn mute_keyword(
        &self,
        keyword: &str,
    ) -> Result<Outcome<MutedKeywordRecord>, AppError> {
        let _lane = self.lane.lock().await;
        let guard = match self.gate("mute_keyword") {
            Ok(guard) => guard,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let keyword = normalize_keyword(keyword);
        if keyword.is_empty() {
            return Err(AppError::Validation("keyword must not be blank".to_string()));
        }

        let key = StoreKey::single(&keyword);
        if let Some(existing) = self.muted_keywords.get(&key).await? {
            return Ok(Outcome::Done(existing));
        }

        let rule = MutedKeywordRecord {
            keyword,
            created_at: Utc::now(),
        };
        if !self
            .muted_keywords
            .upsert_guarded(vec![rule.clone()], &guard)
            .await?
        {
            return Ok(Outcome::Skipped(Self::skipped("mute_keyword")));
        }
        tracing::info!(keyword = %rule.keyword, "Keyword muted");
        Ok(Outcome::Done(rule))
    }

    /// Remove a keyword mute; `Done(false)` when it was not muted
    pub async fn unmute_keyword(&self, keyword: &str) -> Result<Outcome<bool>, AppError> {
        let _lane = self.lane.lock().await;
        if let Err(reason) = self.gate("unmute_keyword") {
            return Ok(Outcome::Skipped(reason));
        }

        let key = StoreKey::single(normalize_keyword(keyword));
        if self.muted_keywords.get(&key).await?.is_none() {
            return Ok(Outcome::Done(false));
        }

        self.muted_keywords.delete(&key).await?;
        Ok(Outcome::Done(true))
    }
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}
