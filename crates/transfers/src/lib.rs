//! Inter-branch transfer domain module (event-sourced).
//!
//! The `StockTransfer` aggregate is the two-phase state machine
//! (pending -> in_transit -> completed, with pending -> cancelled); the
//! actual debits/credits are ledger movements recorded by the branch stock
//! aggregates and orchestrated by the transfer coordinator.

pub mod transfer;

pub use transfer::{
    CancelTransfer, CreateTransfer, MarkDispatched, MarkReceived, RevertDispatch, StockTransfer,
    TransferCancelled, TransferCommand, TransferCreated, TransferDispatchReverted,
    TransferDispatched, TransferEvent, TransferId, TransferReceived, TransferStatus,
};
