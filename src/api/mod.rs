//! API layer
//!
//! Client side of the hosting service API:
//! - Envelope-aware HTTP client
//! - Wire DTOs and mutation payloads
//! - `RemoteAccess` bindings per content kind
//! - Push channels for list-style kinds

mod client;
pub mod dto;
mod endpoints;
mod remote;
mod updates;

pub use client::{ApiClient, ApiEnvelope, ApiRequest, Method, RequestBody, RequestMeta};
pub use remote::{Credentials, FetchScope, RemoteAccess};
pub use updates::{fingerprint, spawn_list_watcher};
