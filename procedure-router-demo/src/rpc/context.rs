//! Application context and services

use super::User;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application context passed to all handlers
#[derive(Clone, Default)]
pub struct AppContext {
    /// Database service
    pub db: DbService,
}

/// Database service (simulated in-memory store)
#[derive(Clone)]
pub struct DbService {
    users: Arc<RwLock<Vec<User>>>,
}

impl DbService {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(vec![
                User::new(1, "Alice", "alice@example.com"),
                User::new(2, "Bob", "bob@example.com"),
            ])),
        }
    }

    pub async fn get_user(&self, id: u32) -> Option<User> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    pub async fn create_user(&self, name: &str, email: &str) -> User {
        let mut users = self.users.write().await;
        let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let user = User::new(id, name, email);
        users.push(user.clone());
        user
    }

    pub async fn count_users(&self) -> u32 {
        self.users.read().await.len() as u32
    }
}

impl Default for DbService {
    fn default() -> Self {
        Self::new()
    }
}
