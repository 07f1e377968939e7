use super::model::{PersonalAccessToken, Session, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Looks up users by username. A real deployment backs this with a
/// database; tests use [`InMemoryUserStore`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Option<User>;
}

/// Holds the single active session per user, keyed by bearer token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_or_replace(&self, session: Session);
    async fn find_by_token(&self, token: &str) -> Option<Session>;
}

/// Looks up personal access tokens by their SHA-256 hash.
#[async_trait]
pub trait PatStore: Send + Sync {
    async fn find_by_hash(&self, token_hash: &str) -> Option<PersonalAccessToken>;
    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>);
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.username.clone(), user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|u| u.clone())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    by_token: DashMap<String, Session>,
    by_user: DashMap<Uuid, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_or_replace(&self, session: Session) {
        if let Some((_, old_token)) = self.by_user.remove(&session.user_id) {
            self.by_token.remove(&old_token);
        }
        self.by_user.insert(session.user_id, session.token.clone());
        self.by_token.insert(session.token.clone(), session);
    }

    async fn find_by_token(&self, token: &str) -> Option<Session> {
        self.by_token.get(token).map(|s| s.clone())
    }
}

#[derive(Default)]
pub struct InMemoryPatStore {
    tokens: DashMap<String, PersonalAccessToken>,
}

impl InMemoryPatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pat: PersonalAccessToken) {
        self.tokens.insert(pat.token_hash.clone(), pat);
    }
}

#[async_trait]
impl PatStore for InMemoryPatStore {
    async fn find_by_hash(&self, token_hash: &str) -> Option<PersonalAccessToken> {
        self.tokens.get(token_hash).map(|p| p.clone())
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(mut entry) = self.tokens.iter_mut().find(|e| e.id == id) {
            entry.last_used_at = Some(at);
        }
    }
}
