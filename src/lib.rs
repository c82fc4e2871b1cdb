//! Custodial wallet money-movement engine.
//!
//! The library holds the ledger core, the external-payment orchestrator, the
//! webhook reconciliation path, the KYC gate and the QR payload signer, plus
//! the HTTP surface that exposes them. `main.rs` wires everything together.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
