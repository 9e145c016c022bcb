//! In-memory fakes for the auth stores and helpers for building test state.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    AppState,
    api::models::users::{Identity, UserCredentials},
    auth::{
        password::{Argon2Params, hash_password_with_params},
        presence::{MemoryPresenceStore, PresenceStore, PresenceTracker},
        session::{SessionCookie, SessionStore},
        stores::{RoleGrantStore, UserStore},
        token::TokenService,
    },
    config::{Config, SessionBackend},
    create_session_store,
    errors::{Error, Result},
    types::{RoleId, UserId},
};

fn store_failure(operation: &str) -> Error {
    Error::Store {
        operation: format!("{operation}: connection refused"),
    }
}

pub fn test_identity(user_id: UserId, role_ids: &[RoleId], is_super_admin: bool) -> Identity {
    Identity {
        user_id,
        username: format!("user{user_id}"),
        display_name: format!("User {user_id}"),
        role_ids: role_ids.to_vec(),
        is_super_admin,
    }
}

pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt.secret = "test-jwt-secret".to_string();
    config.auth.session.secret = "test-session-secret-0123456789abcdef".to_string();
    config.auth.session.backend = SessionBackend::Memory;
    config.auth.store_timeout = Duration::from_secs(2);
    config
}

pub fn create_test_state(users: Arc<dyn UserStore>) -> AppState {
    create_test_state_with(users, Arc::new(CountingGrantStore::new(&[])))
}

pub fn create_test_state_with(users: Arc<dyn UserStore>, grants: Arc<dyn RoleGrantStore>) -> AppState {
    let config = create_test_config();
    AppState::builder()
        .tokens(TokenService::new(&config.auth.jwt))
        .users(users)
        .grants(grants)
        .sessions(create_session_store(&config))
        .presence(PresenceTracker::new(
            Arc::new(MemoryPresenceStore::new()),
            config.auth.presence.online_ttl,
        ))
        .config(config)
        .build()
}

/// User store over a fixed set of identities. Counts `load_by_id` calls.
#[derive(Default)]
pub struct FixedUserStore {
    users: HashMap<UserId, Identity>,
    credentials: HashMap<String, UserCredentials>,
    loads: AtomicUsize,
}

impl FixedUserStore {
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.users.insert(identity.user_id, identity);
        self
    }

    /// Add a user that can log in with `password`
    pub fn with_login(mut self, identity: Identity, password: &str) -> Self {
        let cheap = Argon2Params {
            memory_kib: 128,
            iterations: 1,
            parallelism: 1,
        };
        let password_hash = hash_password_with_params(password, Some(cheap)).expect("hash test password");
        self.credentials.insert(
            identity.username.clone(),
            UserCredentials {
                user_id: identity.user_id,
                username: identity.username.clone(),
                password_hash,
                is_disabled: false,
            },
        );
        self.with_identity(identity)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for FixedUserStore {
    async fn load_by_id(&self, id: UserId) -> Result<Option<Identity>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.get(&id).cloned())
    }

    async fn load_credentials(&self, username: &str) -> Result<Option<UserCredentials>> {
        Ok(self.credentials.get(username).cloned())
    }
}

pub struct FailingUserStore;

#[async_trait]
impl UserStore for FailingUserStore {
    async fn load_by_id(&self, _id: UserId) -> Result<Option<Identity>> {
        Err(store_failure("load user"))
    }

    async fn load_credentials(&self, _username: &str) -> Result<Option<UserCredentials>> {
        Err(store_failure("load credentials"))
    }
}

/// Role-grant store that records every query.
///
/// Answers from a per-role table first, then from an exact (role, path, method) route list;
/// anything else is not granted.
#[derive(Default)]
pub struct CountingGrantStore {
    by_role: HashMap<RoleId, bool>,
    routes: Vec<(RoleId, String, String)>,
    failing_role: Option<RoleId>,
    queries: Mutex<Vec<(RoleId, String, String)>>,
}

impl CountingGrantStore {
    pub fn new(answers: &[(RoleId, bool)]) -> Self {
        Self {
            by_role: answers.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn with_routes(routes: &[(RoleId, &str, &str)]) -> Self {
        Self {
            routes: routes
                .iter()
                .map(|(role, path, method)| (*role, path.to_string(), method.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, role_id: RoleId) -> Self {
        self.failing_role = Some(role_id);
        self
    }

    /// Role ids queried, in order
    pub fn queries(&self) -> Vec<RoleId> {
        self.queries.lock().unwrap().iter().map(|(role, _, _)| *role).collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn last_query(&self) -> Option<(RoleId, String, String)> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RoleGrantStore for CountingGrantStore {
    async fn check(&self, role_id: RoleId, path: &str, method: &str) -> Result<bool> {
        self.queries
            .lock()
            .unwrap()
            .push((role_id, path.to_string(), method.to_string()));

        if self.failing_role == Some(role_id) {
            return Err(store_failure("check role grant"));
        }
        if let Some(granted) = self.by_role.get(&role_id) {
            return Ok(*granted);
        }
        Ok(self
            .routes
            .iter()
            .any(|(role, route, verb)| *role == role_id && route == path && verb == method))
    }
}

pub struct FailingSessionStore;

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn load(&self, _cookie: &str) -> Result<Option<UserId>> {
        Err(store_failure("load session"))
    }

    async fn save(&self, _cookie: Option<&str>, _user_id: Option<UserId>) -> Result<SessionCookie> {
        Err(store_failure("save session"))
    }

    async fn revoke_user(&self, _user_id: UserId) -> Result<()> {
        Err(store_failure("revoke sessions"))
    }
}

pub struct FailingPresenceStore;

#[async_trait]
impl PresenceStore for FailingPresenceStore {
    async fn set(&self, _key: &str, _ttl: Option<Duration>) -> Result<()> {
        Err(store_failure("set presence marker"))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(store_failure("remove presence marker"))
    }

    async fn has(&self, _key: &str) -> Result<bool> {
        Err(store_failure("read presence marker"))
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(store_failure("list presence markers"))
    }
}
