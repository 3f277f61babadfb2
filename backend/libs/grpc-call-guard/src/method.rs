//! Method resolution
//!
//! Turns a fully-qualified gRPC operation name into the short method name
//! the validation and authorization stages dispatch on.

use crate::error::GuardError;

/// Identity of the method a call invokes, resolved once per call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedMethod {
    full_name: String,
    service: String,
    method: String,
}

impl ResolvedMethod {
    /// Parse `pkg.Service/Method` or the HTTP/2 path form `/pkg.Service/Method`
    ///
    /// The method is the segment right after the service. A path without a
    /// non-empty service and method segment is a transport wiring bug, so it
    /// is reported as `MalformedMethodPath` rather than handled per call.
    pub fn parse(full_name: &str) -> Result<Self, GuardError> {
        let trimmed = full_name.strip_prefix('/').unwrap_or(full_name);
        let mut segments = trimmed.split('/');

        let service = segments.next().filter(|s| !s.is_empty());
        let method = segments.next().filter(|s| !s.is_empty());

        match (service, method) {
            (Some(service), Some(method)) => Ok(Self {
                full_name: full_name.to_string(),
                service: service.to_string(),
                method: method.to_string(),
            }),
            _ => Err(GuardError::MalformedMethodPath(full_name.to_string())),
        }
    }

    /// Short method name, e.g. `CreateTenant`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Package-qualified service, e.g. `custos.tenant.TenantManagementService`
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The operation name exactly as the transport supplied it
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

impl std::fmt::Display for ResolvedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// Resolve only the short method name of `full_name`
pub fn resolve_method_name(full_name: &str) -> Result<String, GuardError> {
    ResolvedMethod::parse(full_name).map(|resolved| resolved.method)
}
