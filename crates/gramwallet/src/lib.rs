//! Background controller for a TON wallet.
//!
//! The daemon owns the encrypted seed vault, the active wallet session and the pending send.
//! A UI surface and a dApp page client attach over a local socket; the controller routes
//! messages between them, polls the chain provider and reconciles outgoing transfers against
//! observed history.
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod address;
pub mod amount;
pub mod config;
pub mod controller;
pub mod doctor;
pub mod errors;
pub mod fsutil;
pub mod history;
pub mod ledger;
pub mod paths;
pub mod persist;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod router;
pub mod rpc;
pub mod session;
pub mod store;
pub mod toncenter;
pub mod unlinked;
pub mod vault;

#[cfg(test)]
mod testkit;

pub use controller::Controller;
pub use errors::WalletError;
