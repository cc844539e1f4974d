//! PostgreSQL implementation of [`AccessStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopgate_access::PermissionModel;
use shopgate_core::{ActivityId, IssuedTokenId, Result, UserId};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::store::{AccessStore, AccountRecord, Activity, NewAccount, StoreError};

const ACCOUNT_COLUMNS: &str = r#"
    SELECT u.id, u.external_id, u.email, u.first_name, u.last_name, u.active, u.last_login_at,
           COALESCE(array_agg(r.name ORDER BY r.name) FILTER (WHERE r.name IS NOT NULL),
                    ARRAY[]::TEXT[]) AS roles
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
    LEFT JOIN roles r ON r.id = ur.role_id
"#;

fn database(err: sqlx::Error) -> StoreError {
    StoreError::Database {
        details: err.to_string(),
    }
}

/// Row type for account queries.
#[derive(FromRow)]
struct AccountRow {
    id: String,
    external_id: Option<String>,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    active: bool,
    last_login_at: Option<DateTime<Utc>>,
    roles: Vec<String>,
}

impl AccountRow {
    fn try_into_record(self) -> std::result::Result<AccountRecord, StoreError> {
        let id = UserId::from_str(&self.id).map_err(|e| StoreError::CorruptRecord {
            details: format!("invalid user id '{}': {}", self.id, e),
        })?;
        Ok(AccountRecord {
            id,
            external_id: self.external_id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            active: self.active,
            last_login_at: self.last_login_at,
            roles: self.roles,
        })
    }
}

/// Row type for the role/permission join.
#[derive(FromRow)]
struct GrantRow {
    role: String,
    permission: Option<String>,
}

/// Access store backed by the application database.
pub struct PgAccessStore {
    pool: PgPool,
}

impl PgAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_account_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let sql = format!("{ACCOUNT_COLUMNS} WHERE u.{column} = $1 GROUP BY u.id");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_record()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccessStore for PgAccessStore {
    async fn load_permission_model(&self) -> Result<PermissionModel, StoreError> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            r#"
            SELECT r.name AS role, p.name AS permission
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            LEFT JOIN permissions p ON p.id = rp.permission_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        let mut model = PermissionModel::new();
        for row in &rows {
            model.grant(&row.role, row.permission.as_deref());
        }
        Ok(model)
    }

    async fn default_role(&self) -> Result<Option<String>, StoreError> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_config WHERE key = 'default_user_role'")
                .fetch_optional(&self.pool)
                .await
                .map_err(database)?;
        Ok(value.map(|(v,)| v).filter(|v| !v.trim().is_empty()))
    }

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.find_account_where("external_id", external_id).await
    }

    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.find_account_where("email", email).await
    }

    async fn create_account(
        &self,
        account: &NewAccount,
        role: &str,
    ) -> Result<AccountRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, first_name, last_name, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.external_id)
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        let assigned = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE name = $2
            "#,
        )
        .bind(account.id.to_string())
        .bind(role)
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        if assigned.rows_affected() == 0 {
            return Err(StoreError::Database {
                details: format!("role '{role}' does not exist"),
            }
            .into());
        }

        tx.commit().await.map_err(database)?;

        Ok(AccountRecord {
            id: account.id,
            external_id: Some(account.external_id.clone()),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            active: true,
            last_login_at: None,
            roles: vec![role.to_string()],
        })
    }

    async fn record_login(
        &self,
        id: UserId,
        external_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = $2,
                external_id = COALESCE(external_id, $3),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(at)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }

    async fn record_issued_token(
        &self,
        digest: &str,
        user: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO issued_tokens (id, token_digest, user_id, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token_digest) DO NOTHING
            "#,
        )
        .bind(IssuedTokenId::new().to_string())
        .bind(digest)
        .bind(user.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }

    async fn revoke_token(
        &self,
        digest: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        let owner: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE issued_tokens
            SET revoked_at = $2
            WHERE token_digest = $1 AND revoked_at IS NULL
            RETURNING user_id
            "#,
        )
        .bind(digest)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        match owner {
            Some((id,)) => {
                let id = UserId::from_str(&id).map_err(|e| StoreError::CorruptRecord {
                    details: format!("invalid user id '{id}': {e}"),
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn is_revoked(&self, digest: &str) -> Result<bool, StoreError> {
        let (revoked,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM issued_tokens
                WHERE token_digest = $1 AND revoked_at IS NOT NULL
            )
            "#,
        )
        .bind(digest)
        .fetch_one(&self.pool)
        .await
        .map_err(database)?;
        Ok(revoked)
    }

    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO activity_log (id, user_id, action, occurred_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(ActivityId::new().to_string())
        .bind(user.to_string())
        .bind(activity.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }
}
