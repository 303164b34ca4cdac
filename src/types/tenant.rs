//! Tenant scoping
//!
//! `TenantContext` is the explicit scoping value passed into every public
//! operation of the core. It is never inferred from ambient state: callers
//! resolve it at their boundary and hand it down.

use super::error::ReconError;
use super::reading::{StationId, TenantId};

/// The tenant (and optionally the station) a call is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: TenantId,
    station_id: Option<StationId>,
}

impl TenantContext {
    /// Scope a call to a tenant
    ///
    /// An empty tenant id is accepted here but rejected by every operation
    /// with `MissingTenantContext`.
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into().trim().to_string(),
            station_id: None,
        }
    }

    /// Narrow the scope to a single station
    pub fn with_station(mut self, station_id: impl Into<StationId>) -> Self {
        let station = station_id.into().trim().to_string();
        self.station_id = (!station.is_empty()).then_some(station);
        self
    }

    /// Build a context from optional boundary values (headers, CLI flags)
    ///
    /// # Errors
    ///
    /// Returns `MissingTenantContext` when no non-empty tenant id is given.
    pub fn resolve(tenant: Option<&str>, station: Option<&str>) -> Result<Self, ReconError> {
        let tenant = tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ReconError::MissingTenantContext)?;

        let ctx = Self::new(tenant);
        Ok(match station {
            Some(station) => ctx.with_station(station),
            None => ctx,
        })
    }

    /// The resolved tenant id
    ///
    /// # Errors
    ///
    /// Returns `MissingTenantContext` when the tenant id is empty.
    pub fn tenant(&self) -> Result<&str, ReconError> {
        if self.tenant_id.is_empty() {
            return Err(ReconError::MissingTenantContext);
        }
        Ok(&self.tenant_id)
    }

    /// The station this context is narrowed to, if any
    pub fn station(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    /// Validate a call that targets `station` and return the tenant id
    ///
    /// # Errors
    ///
    /// - `MissingTenantContext` if the tenant id is empty
    /// - `StationOutOfScope` if the context is narrowed to another station
    pub fn scope_station(&self, station: &str) -> Result<&str, ReconError> {
        let tenant = self.tenant()?;
        match self.station() {
            Some(scoped) if scoped != station => {
                Err(ReconError::station_out_of_scope(scoped, station))
            }
            _ => Ok(tenant),
        }
    }

    /// Validate that a record owned by (`tenant`, `station`) may be written
    /// in this context
    pub fn admit(&self, tenant: &str, station: &str) -> Result<(), ReconError> {
        let scoped_tenant = self.scope_station(station)?;
        if scoped_tenant != tenant {
            return Err(ReconError::tenant_mismatch(scoped_tenant, tenant));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::none(None)]
    #[case::empty(Some(""))]
    #[case::blank(Some("   "))]
    fn test_resolve_rejects_missing_tenant(#[case] tenant: Option<&str>) {
        assert_eq!(
            TenantContext::resolve(tenant, Some("s1")),
            Err(ReconError::MissingTenantContext)
        );
    }

    #[test]
    fn test_resolve_trims_and_scopes() {
        let ctx = TenantContext::resolve(Some(" acme "), Some("s1")).unwrap();
        assert_eq!(ctx.tenant(), Ok("acme"));
        assert_eq!(ctx.station(), Some("s1"));
    }

    #[test]
    fn test_empty_context_fails_every_check() {
        let ctx = TenantContext::new("");
        assert_eq!(ctx.tenant(), Err(ReconError::MissingTenantContext));
        assert_eq!(
            ctx.scope_station("s1"),
            Err(ReconError::MissingTenantContext)
        );
    }

    #[test]
    fn test_station_scope_is_enforced() {
        let ctx = TenantContext::new("acme").with_station("s1");
        assert_eq!(ctx.scope_station("s1"), Ok("acme"));
        assert_eq!(
            ctx.scope_station("s2"),
            Err(ReconError::station_out_of_scope("s1", "s2"))
        );
    }

    #[test]
    fn test_unscoped_context_admits_any_station_of_own_tenant() {
        let ctx = TenantContext::new("acme");
        assert!(ctx.admit("acme", "s9").is_ok());
        assert_eq!(
            ctx.admit("globex", "s9"),
            Err(ReconError::tenant_mismatch("acme", "globex"))
        );
    }
}
