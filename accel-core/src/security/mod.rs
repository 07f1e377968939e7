//! Lock state machine and per-IP intrusion detection.

mod intrusion;
mod lock;

pub use intrusion::{AttemptRecord, IntrusionDetector, IntrusionThresholds};
pub use lock::{LockError, LockKind, LockService, LockState};
