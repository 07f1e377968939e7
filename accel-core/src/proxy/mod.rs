//! The pull-through cascade: cache first, then a priority-ordered sweep of
//! upstream registries, caching whatever comes back.

mod service;

pub use service::{ProxyError, ProxyResult, ProxyService};
