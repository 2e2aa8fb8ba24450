//! Provider interface
//!
//! A provider materializes resources of one or more kinds. The engine
//! never talks to a cloud API directly; it only calls these four
//! operations. Provider-wide settings such as the region belong to the
//! provider value itself.

use crate::context::ApplyContext;
use crate::error::ProviderError;
use crate::types::Attributes;

/// What a successful create returns
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Identifier assigned by the provider
    pub provider_id: String,
    pub outputs: Attributes,
}

/// Capability object performing resource operations
///
/// Calls are blocking and may run concurrently from several workers.
/// Long-running implementations should poll [`ApplyContext::is_cancelled`]
/// and return [`ProviderError::cancelled`] once it trips.
pub trait Provider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Create a resource with fully resolved properties
    fn create(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        properties: &Attributes,
    ) -> Result<Created, ProviderError>;

    /// Read the current outputs; `None` if the resource no longer exists
    fn read(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
    ) -> Result<Option<Attributes>, ProviderError>;

    /// Update a resource in place
    fn update(
        &self,
        ctx: &ApplyContext,
        kind: &str,
        provider_id: &str,
        properties: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    /// Delete a resource
    fn delete(&self, ctx: &ApplyContext, kind: &str, provider_id: &str)
    -> Result<(), ProviderError>;
}
