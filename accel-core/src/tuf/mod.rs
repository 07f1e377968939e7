//! TUF-style signed metadata: root/targets/snapshot/timestamp role chain,
//! target hashing, key rotation, delegations, and expiry.

mod keys;
mod manager;
mod roles;

pub use keys::{KeyPair, RoleKeySet};
pub use manager::{ExpiryWarning, TufError, TufManager, TufResult};
pub use roles::{Delegation, RoleName, RoleState, SignedRole, TargetRecord};
