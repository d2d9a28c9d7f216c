//! Cache key for remote shims.

use capability_types::DonId;
use std::fmt;

/// `(capability ID, DON ID, method)`. The method is empty for single-method
/// capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShimKey {
    pub capability_id: String,
    pub don_id: DonId,
    pub method: String,
}

impl ShimKey {
    /// Key of a single-method shim, or of a combined client itself.
    pub fn new(capability_id: impl Into<String>, don_id: DonId) -> Self {
        Self::for_method(capability_id, don_id, "")
    }

    pub fn for_method(
        capability_id: impl Into<String>,
        don_id: DonId,
        method: impl Into<String>,
    ) -> Self {
        Self {
            capability_id: capability_id.into(),
            don_id,
            method: method.into(),
        }
    }
}

impl fmt::Display for ShimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.capability_id, self.don_id, self.method)
    }
}
