//! Movement coordinators: synchronous cross-aggregate orchestration.
//!
//! Coordinators validate fully before issuing any ledger write, issue
//! commands in an order that lets the state machine decide races first, and
//! compensate when a later step fails. Each individual command append is
//! atomic; the coordinator owns the ordering between them.

pub mod assemblies;
pub mod receipts;
pub mod transfers;
pub mod variant_sync;

pub use assemblies::{AssemblyReceipt, AssemblyRequest, execute_assembly};
pub use receipts::{ReceiptRequest, receive_stock};
pub use transfers::{
    cancel_transfer, create_transfer, dispatch_transfer, load_transfer, receive_transfer,
};
pub use variant_sync::{SyncReport, deactivate_variant, synchronize_variants};
