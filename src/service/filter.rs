//! Timeline mute filtering
//!
//! A status is suppressed when its author is muted or its content
//! contains a muted keyword (case-insensitive). Evaluated at read time
//! against the cached timeline.

use std::collections::HashSet;

use crate::data::{Address, MutedAddressRecord, MutedKeywordRecord, StatusRecord};

/// Persisted mute rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuteRules {
    pub addresses: Vec<MutedAddressRecord>,
    pub keywords: Vec<MutedKeywordRecord>,
}

impl MuteRules {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.keywords.is_empty()
    }

    pub fn filter(&self) -> MuteFilter {
        MuteFilter::new(
            self.addresses.iter().map(|rule| rule.address.clone()),
            self.keywords.iter().map(|rule| rule.keyword.as_str()),
        )
    }
}

/// Mute rules prepared for repeated evaluation
#[derive(Debug, Clone, Default)]
pub struct MuteFilter {
    addresses: HashSet<Address>,
    keywords: Vec<String>,
}

impl MuteFilter {
    pub fn new<'a>(
        addresses: impl IntoIterator<Item = Address>,
        keywords: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            keywords: keywords
                .into_iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    pub fn is_muted(&self, status: &StatusRecord) -> bool {
        if self.addresses.contains(&status.address) {
            return true;
        }
        if self.keywords.is_empty() {
            return false;
        }

        let content = status.content.to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| content.contains(keyword.as_str()))
    }
}

/// Whether `status` is hidden by the given rules
pub fn should_filter(
    status: &StatusRecord,
    muted_addresses: &[Address],
    muted_keywords: &[String],
) -> bool {
    MuteFilter::new(
        muted_addresses.iter().cloned(),
        muted_keywords.iter().map(String::as_str),
    )
    .is_muted(status)
}
