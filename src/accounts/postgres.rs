use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use super::models::{Account, NewAccount, Role, Subscription};
use super::store::{AccountStore, StoreError};

const ACCOUNT_COLUMNS: &str = r#"
    id,
    email,
    name,
    password_hash,
    role,
    profile,
    provider_customer_id,
    subscription_plan,
    subscription_external_id,
    subscription_status,
    subscription_period_end,
    subscription_is_active,
    version,
    created_at
"#;

/// key: account-store-postgres -> versioned account rows
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i32,
    email: String,
    name: String,
    password_hash: String,
    role: String,
    profile: Value,
    provider_customer_id: Option<String>,
    subscription_plan: Option<String>,
    subscription_external_id: Option<String>,
    subscription_status: Option<String>,
    subscription_period_end: Option<DateTime<Utc>>,
    subscription_is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_id = row.id;
        let corrupt = move |reason: String| StoreError::Corrupt { account_id, reason };
        let role = row.role.parse::<Role>().map_err(corrupt)?;
        let plan = row
            .subscription_plan
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(corrupt)?;
        Ok(Account {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role,
            profile: row.profile,
            provider_customer_id: row.provider_customer_id,
            subscription: Subscription {
                plan,
                external_subscription_id: row.subscription_external_id,
                status: row.subscription_status,
                current_period_end: row.subscription_period_end,
                is_active: row.subscription_is_active,
            },
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: i32) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email.trim().to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let email = account.email.trim().to_ascii_lowercase();
        let result = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts (email, name, password_hash, role, profile)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&email)
        .bind(&account.name)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(&account.profile)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("accounts_email_key") =>
            {
                Err(StoreError::DuplicateEmail(email))
            }
            Err(err) => Err(StoreError::Db(err)),
        }
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let subscription = &account.subscription;
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts SET
                name = $3,
                role = $4,
                profile = $5,
                provider_customer_id = $6,
                subscription_plan = $7,
                subscription_external_id = $8,
                subscription_status = $9,
                subscription_period_end = $10,
                subscription_is_active = $11,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(account.version)
        .bind(&account.name)
        .bind(account.role.as_str())
        .bind(&account.profile)
        .bind(&account.provider_customer_id)
        .bind(subscription.plan.map(|plan| plan.as_str()))
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.status)
        .bind(subscription.current_period_end)
        .bind(subscription.is_active)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row.try_into();
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(account.id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Err(StoreError::Conflict {
                account_id: account.id,
                version: account.version,
            })
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn list_with_external_subscription(&self) -> Result<Vec<i32>, StoreError> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM accounts WHERE subscription_external_id IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
