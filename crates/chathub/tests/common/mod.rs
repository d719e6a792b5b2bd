//! Test utilities and common setup.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chathub::api::{self, AppState};
use chathub::auth::{AuthConfig, AuthState};
use chathub::db::Database;
use chathub::ids::UserId;
use chathub::store::SqliteConversationStore;
use chathub::ws::{ConnectionConfig, Hub, HubConfig, HubHandle};
use tokio::net::TcpListener;

pub const TEST_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

/// Create a test AuthConfig with a JWT secret for testing.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some(TEST_SECRET.to_string()),
        ..AuthConfig::default()
    }
}

/// A fully wired application over an in-memory database.
pub struct TestApp {
    pub router: Router,
    pub auth: AuthState,
    pub conversations: Arc<SqliteConversationStore>,
    pub hub: HubHandle,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_connection_config(ConnectionConfig::default()).await
    }

    pub async fn with_connection_config(connection: ConnectionConfig) -> Self {
        let db = Database::in_memory().await.unwrap();
        let conversations = Arc::new(SqliteConversationStore::new(&db));
        let hub = Hub::spawn(conversations.clone(), HubConfig::default());

        let auth_config = test_auth_config();
        let allowed_origins = auth_config.allowed_origins.clone();
        let auth = AuthState::new(auth_config).unwrap();

        let state = AppState::new(
            Arc::new(auth.clone()),
            conversations.clone(),
            hub.clone(),
            connection,
            allowed_origins,
        );

        Self {
            router: api::create_router(state),
            auth,
            conversations,
            hub,
        }
    }

    /// Signed bearer token for `user`.
    pub fn token(&self, user: &str) -> String {
        self.auth.generate_token(user).unwrap()
    }

    /// Serve the router on an ephemeral local port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Wait until the hub reports every user in `users` online.
    pub async fn wait_online(&self, users: &[&str]) {
        self.wait_for(|online| users.iter().all(|u| online.contains(&UserId::from(*u))))
            .await;
    }

    /// Wait until the hub reports `user` offline.
    pub async fn wait_offline(&self, user: &str) {
        let user = UserId::from(user);
        self.wait_for(|online| !online.contains(&user)).await;
    }

    async fn wait_for(&self, condition: impl Fn(&[UserId]) -> bool) {
        for _ in 0..200 {
            let snapshot = self.hub.snapshot().await.unwrap();
            let online: Vec<UserId> = snapshot.users().cloned().collect();
            if condition(&online) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub did not reach the expected state in time");
    }
}
