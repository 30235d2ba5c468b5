//! Remote access contract
//!
//! One `RemoteAccess<K>` implementation per content kind. Implementations
//! hold no session state: credentials and the acting address are passed
//! with every call.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::data::Address;
use crate::error::AppError;
use crate::service::ContentKind;

/// Bearer credentials for one call
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// Which records a fetch covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Service-wide feed
    Everyone,
    /// Records owned by one address
    Address(Address),
}

impl FetchScope {
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::Everyone => None,
            Self::Address(address) => Some(address),
        }
    }
}

fn not_implemented<K: ContentKind>(operation: &str) -> AppError {
    AppError::NotImplemented(format!("{operation} is not supported for {}", K::NAME))
}

/// Network access for one content kind
#[async_trait]
pub trait RemoteAccess<K: ContentKind>: Send + Sync {
    /// Read the current remote list (zero or one element for singleton kinds)
    async fn fetch(
        &self,
        scope: &FetchScope,
        credentials: &Credentials,
    ) -> Result<Vec<K::Remote>, AppError>;

    async fn create(
        &self,
        _address: &Address,
        _draft: K::Draft,
        _credentials: &Credentials,
    ) -> Result<K::Remote, AppError> {
        Err(not_implemented::<K>("create"))
    }

    async fn update(
        &self,
        _address: &Address,
        _id: &str,
        _patch: K::Patch,
        _credentials: &Credentials,
    ) -> Result<K::Remote, AppError> {
        Err(not_implemented::<K>("update"))
    }

    async fn delete(
        &self,
        _address: &Address,
        _id: &str,
        _credentials: &Credentials,
    ) -> Result<(), AppError> {
        Err(not_implemented::<K>("delete"))
    }

    /// Push channel of remote list snapshots for `address`
    ///
    /// `None` for kinds without a push channel. The producer stops once
    /// the receiver is dropped.
    fn updates(
        &self,
        _address: &Address,
        _credentials: &Credentials,
    ) -> Option<mpsc::Receiver<Vec<K::Remote>>> {
        None
    }
}
