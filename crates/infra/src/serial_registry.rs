//! Tenant-wide serial number registry.
//!
//! Serial uniqueness spans branches, so it cannot be enforced inside a single
//! branch-stock aggregate. Like SKU uniqueness in the product catalog, it is
//! an infrastructure concern: the receipt coordinator registers serials here
//! *before* dispatching the receipt command, and rolls the registration back
//! if the command is rejected. The branch aggregate still re-checks
//! per-branch presence as the last line of defense.

use std::collections::HashSet;
use std::sync::RwLock;

use stockpile_core::{DomainError, TenantId};
use stockpile_ledger::SerialNumber;

/// In-memory tenant-scoped registry of every serial number ever received.
///
/// Registration is all-or-nothing: if any serial in the batch is taken (or
/// repeated within the batch), nothing is registered.
#[derive(Debug, Default)]
pub struct SerialRegistry {
    known: RwLock<HashSet<(TenantId, SerialNumber)>>,
}

impl SerialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a batch of serials for a tenant.
    pub fn register(
        &self,
        tenant_id: TenantId,
        serials: &[SerialNumber],
    ) -> Result<(), DomainError> {
        let mut known = self
            .known
            .write()
            .map_err(|_| DomainError::conflict("serial registry lock poisoned"))?;

        for (idx, serial) in serials.iter().enumerate() {
            if serial.is_blank() {
                return Err(DomainError::validation("serial number cannot be blank"));
            }
            if serials[..idx].contains(serial) {
                return Err(DomainError::validation(format!(
                    "serial '{serial}' listed twice"
                )));
            }
            if known.contains(&(tenant_id, serial.clone())) {
                return Err(DomainError::conflict(format!(
                    "serial '{serial}' is already registered"
                )));
            }
        }

        for serial in serials {
            known.insert((tenant_id, serial.clone()));
        }
        Ok(())
    }

    /// Undo a registration whose receipt failed downstream.
    pub fn unregister(&self, tenant_id: TenantId, serials: &[SerialNumber]) {
        if let Ok(mut known) = self.known.write() {
            for serial in serials {
                known.remove(&(tenant_id, serial.clone()));
            }
        }
    }

    pub fn is_registered(&self, tenant_id: TenantId, serial: &SerialNumber) -> bool {
        self.known
            .read()
            .map(|known| known.contains(&(tenant_id, serial.clone())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serials(names: &[&str]) -> Vec<SerialNumber> {
        names.iter().map(|n| SerialNumber::from(*n)).collect()
    }

    #[test]
    fn duplicate_registration_fails_whole_batch() {
        let registry = SerialRegistry::new();
        let tenant = TenantId::new();

        registry.register(tenant, &serials(&["A", "B"])).unwrap();

        let err = registry.register(tenant, &serials(&["C", "B"])).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // C must not have been claimed by the failed batch.
        assert!(!registry.is_registered(tenant, &SerialNumber::from("C")));
    }

    #[test]
    fn uniqueness_is_per_tenant() {
        let registry = SerialRegistry::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        registry.register(tenant_a, &serials(&["A"])).unwrap();
        registry.register(tenant_b, &serials(&["A"])).unwrap();
    }

    #[test]
    fn unregister_rolls_back_a_failed_receipt() {
        let registry = SerialRegistry::new();
        let tenant = TenantId::new();

        registry.register(tenant, &serials(&["A"])).unwrap();
        registry.unregister(tenant, &serials(&["A"]));
        assert!(!registry.is_registered(tenant, &SerialNumber::from("A")));
        registry.register(tenant, &serials(&["A"])).unwrap();
    }
}
