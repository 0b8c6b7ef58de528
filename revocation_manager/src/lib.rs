#![allow(clippy::result_large_err)]
#![allow(clippy::large_enum_variant)]

//! Issuer-side management of credential revocation registries.
//!
//! This crate owns the revocation registry state machine and the protocol
//! that keeps wallet-held accumulator state synchronized with an append-only
//! ledger: lifecycle transitions, batched revocation publication, divergence
//! recovery and endorsed (co-signed) transaction handoff. The ledger itself,
//! the accumulator cryptography, tails file hosting and record persistence
//! are consumed through capability traits and injected by the host agent.

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_json;

pub mod cache;
pub mod config;
pub mod endorsement;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod manager;
pub mod records;
pub mod storage;
pub mod tails;

pub use config::RevocationConfig;
pub use manager::{
    context::RevocationContext, lifecycle::RegistryLifecycle, publish::RevocationBatcher,
    recovery::RecoveryProtocol, waiter::RegistryWaiter,
};
