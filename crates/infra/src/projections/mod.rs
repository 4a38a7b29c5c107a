//! Read-model projections.
//!
//! Projections consume published envelopes and maintain tenant-isolated,
//! disposable read models. Each one is an idempotent at-least-once consumer:
//! a per-(tenant, aggregate) cursor skips duplicates and rejects sequence
//! gaps, so the same projection code serves inline (synchronous) application
//! and bus-driven replay.

pub mod catalog;
pub mod movement_history;
pub mod serial_index;
pub mod stock_levels;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use stockpile_core::{AggregateId, TenantId};

pub use catalog::{CatalogProjection, TemplateView, VariantView};
pub use movement_history::{MovementHistoryProjection, MovementView};
pub use serial_index::{SerialIndexProjection, SerialView};
pub use stock_levels::{StockLevel, StockLevelsProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Per-(tenant, aggregate) stream cursors shared by all projections.
///
/// `check` decides whether an envelope is fresh, a duplicate (safe to skip)
/// or out of order; `advance` moves the cursor after a successful apply.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(true)` when the envelope should be applied, `Ok(false)`
    /// for a duplicate/replay.
    pub(crate) fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<bool, ProjectionError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| ProjectionError::TenantIsolation("cursor lock poisoned".to_string()))?;
        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if sequence_number == 0 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        if sequence_number <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(false);
        }
        // First event may start at any positive sequence; afterwards we
        // require strict increments.
        if last != 0 && sequence_number != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        Ok(true)
    }

    pub(crate) fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
    }
}

/// Simple 1-based pagination window used by the query facade.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(50).clamp(1, 500),
        }
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let start = (self.page as usize - 1) * self.per_page as usize;
        items
            .into_iter()
            .skip(start)
            .take(self.per_page as usize)
            .collect()
    }
}
