use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo::{AccountDirectory, DirectoryError},
    repo_types::{NewUser, UserRecord},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    by_email: HashMap<String, Uuid>,
}

/// In-process directory. Data lives as long as the process.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }
}

#[async_trait]
impl AccountDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        let tables = self.inner.read().await;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        // Check and insert under one write guard so the email index stays unique.
        let mut tables = self.inner.write().await;
        if tables.by_email.contains_key(&user.email) {
            return Err(DirectoryError::DuplicateEmail);
        }
        let record = user.into_record();
        tables.by_email.insert(record.email.clone(), record.id);
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
