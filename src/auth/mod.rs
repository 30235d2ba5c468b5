//! Session state
//!
//! Handles:
//! - Account and selected-address tracking
//! - Logout events consumed by the local stores
//! - The `SessionProvider` contract the repositories gate on

pub mod session;

pub use session::{
    Account, AddressGrant, Profile, SelectedAddress, SessionManager, SessionProvider, SessionState,
};
