//! Per-call context

use crate::method::ResolvedMethod;
use tonic::metadata::MetadataMap;

/// State every stage sees for one in-flight call
///
/// Built once when the call starts and owned by that call only. The method
/// identity and the caller metadata never change for the call's lifetime.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: ResolvedMethod,
    metadata: MetadataMap,
}

impl CallContext {
    pub fn new(method: ResolvedMethod, metadata: MetadataMap) -> Self {
        Self { method, metadata }
    }

    /// Short method name used as the dispatch key
    pub fn method_name(&self) -> &str {
        self.method.method()
    }

    pub fn method(&self) -> &ResolvedMethod {
        &self.method
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }
}
