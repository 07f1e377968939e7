//! Core engine for the registry pull-through accelerator.
//!
//! This crate holds every data-plane component described by the project's
//! design: content-addressed blob storage, a bounded LRU cache, a
//! priority-ordered upstream cascade, a P2P blob-exchange node, TUF-style
//! signed metadata, and the security envelope (sessions, lockout,
//! intrusion detection, audit log) that gates all of it. No HTTP framework
//! dependency lives here; `accel-server` wires these components to Axum.

pub mod audit;
pub mod auth;
pub mod automation;
pub mod blob;
pub mod cache;
pub mod canonical;
pub mod p2p;
pub mod proxy;
pub mod security;
pub mod tuf;
pub mod upstream;
pub mod ws;

pub use anyhow::Result as AnyResult;
