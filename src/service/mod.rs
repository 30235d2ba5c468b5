//! Service layer
//!
//! Synchronization logic between the remote API and the local stores:
//! content kinds, the generic repository and the timeline mute policy.

mod content;
mod filter;
mod repository;
mod timeline;

pub use content::{
    Bookmarks, ContentKind, NowPage, Pastes, Pictures, SyncStyle, Timeline, WebPage, Weblog,
};
pub use filter::{MuteFilter, MuteRules, should_filter};
pub use repository::{
    CacheSync, MutationReport, Outcome, Repository, SkipReason, SyncDiagnostic,
};
pub use timeline::TimelineService;
