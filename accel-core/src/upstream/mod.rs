//! Priority-ordered, enable/disable-aware upstream registry list.

mod router;
mod source;

pub use router::{UpstreamError, UpstreamResult, UpstreamRouter};
pub use source::UpstreamSource;
