//! Meta-transaction authorization and execution.
//!
//! A principal signs an EIP-712 structured request off-chain. A registered relayer
//! submits it together with native funding, and the engine checks the signature
//! against the principal's nonce, forwards the call (or batch of calls) through
//! the principal's deterministic wallet, and pays the relayer's fee.
//!
//! # Roles
//!
//! - **Principal**: signs requests with [`client::RequestSigner`].
//! - **Relayer**: submits signed requests. The [`service`] module wraps an engine
//!   and an in-memory ledger into a relay, and [`handlers`] exposes it over HTTP.
//! - **Admin**: manages relayers, pausing and the fee recipient through
//!   [`engine::MetaTxEngine`].
//!
//! # Modules
//!
//! - [`engine`] - the executor: gate chain, forwarding, fee settlement, admin operations.
//! - [`hasher`] - EIP-712 domain and request digests.
//! - [`signature`] - ECDSA recovery with malleability rejection.
//! - [`nonce`] - per-principal sequential nonces with staged commit.
//! - [`relayer`] - the relayer allowlist.
//! - [`guard`] - pause switch, reentrancy lock, admin check.
//! - [`wallet`] - CREATE2 address derivation and one-time deployment.
//! - [`fee`] - native fee settlement with an optional token fallback.
//! - [`host`] - the [`Ledger`](host::Ledger) abstraction and its in-memory implementation.
//! - [`events`] - events emitted through the host.
//! - [`config`] - server configuration with environment-variable indirection.
//! - [`util`] - telemetry and signal handling.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fee;
pub mod guard;
pub mod handlers;
pub mod hasher;
pub mod host;
pub mod nonce;
pub mod relayer;
pub mod request;
pub mod service;
pub mod signature;
pub mod types;
pub mod util;
pub mod wallet;
