//! Session management
//!
//! Tracks the signed-in account, the address selected for
//! address-scoped operations, and the bearer token. State is readable
//! synchronously and observable through watch channels; logout is
//! announced on a broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::{broadcast, watch};

use crate::data::{Address, WriteGuard};
use crate::error::AppError;

/// Profile of the signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
}

/// An address the account may act as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressGrant {
    pub address: Address,
    /// Registration expiry; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl AddressGrant {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            expires_at: None,
        }
    }

    /// Check if the grant is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < Utc::now())
    }
}

/// Account half of the session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Account {
    #[default]
    NotSynchronized,
    Synchronized {
        profile: Profile,
        addresses: Vec<AddressGrant>,
    },
}

impl Account {
    /// Whether `address` is one of the account's unexpired grants
    pub fn grants(&self, address: &Address) -> bool {
        match self {
            Self::NotSynchronized => false,
            Self::Synchronized { addresses, .. } => addresses
                .iter()
                .any(|grant| &grant.address == address && !grant.is_expired()),
        }
    }
}

/// Address half of the session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectedAddress {
    #[default]
    Unset,
    Set(Address),
}

impl SelectedAddress {
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::Unset => None,
            Self::Set(address) => Some(address),
        }
    }
}

/// Joined view of account and selected address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unavailable,
    Active {
        account: Account,
        selected: SelectedAddress,
    },
}

impl SessionState {
    pub fn join(account: &Account, selected: &SelectedAddress) -> Self {
        match account {
            Account::NotSynchronized => Self::Unavailable,
            Account::Synchronized { .. } => Self::Active {
                account: account.clone(),
                selected: selected.clone(),
            },
        }
    }
}

/// Authentication state consumed by repositories and stores
pub trait SessionProvider: Send + Sync {
    fn is_logged_in(&self) -> bool;

    fn current_address(&self) -> Option<Address>;

    fn access_token(&self) -> Option<String>;

    fn account_changes(&self) -> watch::Receiver<Account>;

    fn address_changes(&self) -> watch::Receiver<SelectedAddress>;

    fn logout_events(&self) -> broadcast::Receiver<()>;

    /// Counter advanced on every sign-in and logout
    fn session_epoch(&self) -> watch::Receiver<u64>;

    /// Guard for cache writes issued under the current session
    ///
    /// Take it before checking the gate, so a logout racing the check
    /// invalidates the guard rather than slipping past it.
    fn write_guard(&self) -> WriteGuard {
        WriteGuard::new(self.session_epoch())
    }
}

/// In-process session provider
pub struct SessionManager {
    account: watch::Sender<Account>,
    selected: watch::Sender<SelectedAddress>,
    token: RwLock<Option<String>>,
    logout: broadcast::Sender<()>,
    epoch: watch::Sender<u64>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        let (account, _) = watch::channel(Account::NotSynchronized);
        let (selected, _) = watch::channel(SelectedAddress::Unset);
        let (logout, _) = broadcast::channel(16);
        let (epoch, _) = watch::channel(0);

        Self {
            account,
            selected,
            token: RwLock::new(None),
            logout,
            epoch,
        }
    }

    /// Store an issued token and the account it belongs to
    ///
    /// A previously selected address that the new account does not grant
    /// is cleared.
    pub fn sign_in(
        &self,
        profile: Profile,
        addresses: Vec<AddressGrant>,
        token: impl Into<String>,
    ) -> Result<(), AppError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AppError::Validation("access token must not be empty".to_string()));
        }

        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);

        let account = Account::Synchronized { profile, addresses };
        self.selected.send_if_modified(|selected| match selected {
            SelectedAddress::Set(address) if !account.grants(address) => {
                *selected = SelectedAddress::Unset;
                true
            }
            _ => false,
        });
        self.account.send_replace(account);
        self.epoch.send_modify(|epoch| *epoch += 1);

        tracing::info!("Session signed in");
        Ok(())
    }

    /// Select the address used by address-scoped operations
    pub fn select_address(&self, address: impl Into<Address>) -> Result<(), AppError> {
        let address = address.into();

        if !self.is_logged_in() {
            return Err(AppError::Unauthorized);
        }
        if !self.account.borrow().grants(&address) {
            return Err(AppError::Validation(format!(
                "address '{address}' is not an active grant of this account"
            )));
        }

        let next = SelectedAddress::Set(address.clone());
        let changed = self.selected.send_if_modified(|selected| {
            if *selected == next {
                return false;
            }
            *selected = next;
            true
        });

        if changed {
            tracing::info!(address = %address, "Address selected");
        }
        Ok(())
    }

    /// Clear the selected address without signing out
    pub fn clear_address(&self) {
        self.selected.send_if_modified(|selected| {
            let was_set = matches!(selected, SelectedAddress::Set(_));
            *selected = SelectedAddress::Unset;
            was_set
        });
    }

    /// Clear the session and announce the logout
    ///
    /// State is cleared before the epoch advances, and the epoch advances
    /// before the event fires, so event subscribers and pending writes
    /// already see the signed-out session.
    pub fn logout(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.selected.send_replace(SelectedAddress::Unset);
        self.account.send_replace(Account::NotSynchronized);
        self.epoch.send_modify(|epoch| *epoch += 1);

        let subscribers = self.logout.send(()).unwrap_or(0);
        tracing::info!(subscribers, "Session logged out");
    }

    pub fn state(&self) -> SessionState {
        SessionState::join(&self.account.borrow(), &self.selected.borrow())
    }
}

impl SessionProvider for SessionManager {
    fn is_logged_in(&self) -> bool {
        matches!(*self.account.borrow(), Account::Synchronized { .. })
            && self.access_token().is_some()
    }

    fn current_address(&self) -> Option<Address> {
        self.selected.borrow().address().cloned()
    }

    fn access_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn account_changes(&self) -> watch::Receiver<Account> {
        self.account.subscribe()
    }

    fn address_changes(&self) -> watch::Receiver<SelectedAddress> {
        self.selected.subscribe()
    }

    fn logout_events(&self) -> broadcast::Receiver<()> {
        self.logout.subscribe()
    }

    fn session_epoch(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }
}
