//! Username/password and personal-access-token authentication.

mod model;
mod service;
mod store;

pub use model::{PersonalAccessToken, Session, User};
pub use service::{AuthError, AuthResult, AuthService, Claims, LoginOutcome};
pub use store::{InMemoryPatStore, InMemorySessionStore, InMemoryUserStore, PatStore, SessionStore, UserStore};
