//! In-memory account store used by tests and local runs without Postgres.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::models::{Account, NewAccount, Subscription};
use super::store::{AccountStore, StoreError};

#[derive(Debug)]
pub struct InMemoryAccountStore {
    accounts: DashMap<i32, Account>,
    emails: DashMap<String, i32>,
    next_id: AtomicI32,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self {
            accounts: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicI32::new(1),
        }
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_id(&self, id: i32) -> Result<Account, StoreError> {
        self.accounts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let key = email.trim().to_ascii_lowercase();
        let Some(id) = self.emails.get(&key).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.accounts.get(&id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let key = account.email.trim().to_ascii_lowercase();
        let id = match self.emails.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateEmail(key)),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(id);
                id
            }
        };
        let record = Account {
            id,
            email: key,
            name: account.name,
            password_hash: account.password_hash,
            role: account.role,
            profile: account.profile,
            provider_customer_id: None,
            subscription: Subscription::default(),
            version: 0,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, record.clone());
        Ok(record)
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let mut stored = self
            .accounts
            .get_mut(&account.id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != account.version {
            return Err(StoreError::Conflict {
                account_id: account.id,
                version: account.version,
            });
        }
        let mut updated = account.clone();
        updated.email = stored.email.clone();
        updated.created_at = stored.created_at;
        updated.version = stored.version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_with_external_subscription(&self) -> Result<Vec<i32>, StoreError> {
        let mut ids: Vec<i32> = self
            .accounts
            .iter()
            .filter(|entry| entry.subscription.external_subscription_id.is_some())
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;
    use serde_json::json;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            name: "Asha".to_string(),
            password_hash: "hashed".to_string(),
            role: Role::Student,
            profile: json!({}),
        }
    }

    #[tokio::test]
    async fn save_bumps_version() {
        let store = InMemoryAccountStore::new();
        let account = store.create(new_account("a@example.com")).await.unwrap();
        assert_eq!(account.version, 0);

        let saved = store.save(&account).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.find_by_id(account.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let store = InMemoryAccountStore::new();
        let account = store.create(new_account("b@example.com")).await.unwrap();
        store.save(&account).await.unwrap();

        let mut stale = account.clone();
        stale.name = "Overwritten".to_string();
        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { version: 0, .. }));
        assert_eq!(store.find_by_id(account.id).await.unwrap().name, "Asha");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let store = InMemoryAccountStore::new();
        store.create(new_account("c@example.com")).await.unwrap();
        let err = store.create(new_account("C@Example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail(_)));
        assert!(store.find_by_email("C@EXAMPLE.COM").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let store = InMemoryAccountStore::new();
        assert!(matches!(
            store.find_by_id(99).await,
            Err(StoreError::NotFound)
        ));
    }
}
