//! Orbital cross-chain lending relayer.
//!
//! Guardian-signed messages emitted by the Orbital contracts are picked up by
//! the [`listener`], classified and decoded ([`classifier`], [`codec`]), and
//! submitted to the destination chain through a [`chains::ChainAdapter`]. The
//! [`dispatcher`] drives each message through those steps and keeps a
//! best-effort [`ledger`] of the loans it has opened and settled.

pub mod chains;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod ledger;
pub mod listener;
pub mod monitor;
pub mod tokens;
pub mod types;

pub use chains::{AdapterRegistry, ChainAdapter};
pub use dispatcher::{DispatchError, DispatchOutcome, DispatchStage, Dispatcher};
pub use ledger::{LoanRecord, LoanState, OutcomeLedger};
pub use types::{AttestedMessage, RelayError, RelayerConfig};
