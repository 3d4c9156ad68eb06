use std::collections::HashMap;

use async_trait::async_trait;
use shared::{
    domain::{User, UserId},
    error::ChatError,
    protocol::DELETED_SENDER_LABEL,
};

/// One-shot read of every known user.
#[async_trait]
pub trait RosterLoader: Send + Sync {
    async fn load_roster(&self) -> Result<Vec<User>, ChatError>;
}

pub struct MissingRosterLoader;

#[async_trait]
impl RosterLoader for MissingRosterLoader {
    async fn load_roster(&self) -> Result<Vec<User>, ChatError> {
        Err(ChatError::backend_unavailable("roster backend is unavailable"))
    }
}

/// Point-in-time index of the roster, fixed for one sync lifecycle.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    by_id: HashMap<UserId, User>,
}

impl Roster {
    /// When an id appears twice the first record wins.
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        let mut by_id = HashMap::new();
        for user in users {
            by_id.entry(user.id.clone()).or_insert(user);
        }
        Self { by_id }
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.by_id.get(id)
    }

    pub fn label_for(&self, sender_id: Option<&UserId>) -> &str {
        sender_id
            .and_then(|id| self.by_id.get(id))
            .map(|user| user.display_label.as_str())
            .unwrap_or(DELETED_SENDER_LABEL)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl From<Vec<User>> for Roster {
    fn from(users: Vec<User>) -> Self {
        Self::new(users)
    }
}
