//! Effective write-policy selection.

use crate::entity::Asset;
use depot_core::WritePolicy;

/// Resolves the effective write policy for a specific asset.
///
/// The default keeps the repository-wide policy; formats install selectors
/// to carve out exceptions, e.g. metadata assets that stay updatable in an
/// otherwise write-once repository.
pub trait WritePolicySelector: Send + Sync {
    /// The policy to enforce for `asset`, given the configured policy.
    fn select(&self, asset: &Asset, configured: WritePolicy) -> WritePolicy;
}

/// Selector that always applies the configured policy.
pub struct DefaultWritePolicySelector;

impl WritePolicySelector for DefaultWritePolicySelector {
    fn select(&self, _asset: &Asset, configured: WritePolicy) -> WritePolicy {
        configured
    }
}
