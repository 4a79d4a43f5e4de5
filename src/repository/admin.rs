//! Admin account repository

use super::map_unique_violation;
use crate::domain::{AdminAccount, StringUuid};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminAccountRepository: Send + Sync {
    async fn create<'a>(
        &self,
        username: &str,
        email: Option<&'a str>,
        password_hash: &str,
    ) -> Result<AdminAccount>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<AdminAccount>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminAccount>>;
    async fn list(&self) -> Result<Vec<AdminAccount>>;
    async fn count(&self) -> Result<i64>;
    async fn update_password(&self, id: StringUuid, password_hash: &str) -> Result<()>;
    async fn touch_last_login(&self, id: StringUuid) -> Result<()>;
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct AdminAccountRepositoryImpl {
    pool: MySqlPool,
}

impl AdminAccountRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, username, email, password_hash, two_fa_enabled, two_fa_method, \
                       two_fa_secret, two_fa_recovery_codes, last_login_at, created_at, updated_at";

#[async_trait]
impl AdminAccountRepository for AdminAccountRepositoryImpl {
    async fn create<'a>(
        &self,
        username: &str,
        email: Option<&'a str>,
        password_hash: &str,
    ) -> Result<AdminAccount> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO admin_accounts
                (id, username, email, password_hash, two_fa_enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, false, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "An admin with this username already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create admin account")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<AdminAccount>> {
        let account = sqlx::query_as::<_, AdminAccount>(&format!(
            "SELECT {} FROM admin_accounts WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<AdminAccount>> {
        let account = sqlx::query_as::<_, AdminAccount>(&format!(
            "SELECT {} FROM admin_accounts WHERE username = ?",
            COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn list(&self) -> Result<Vec<AdminAccount>> {
        let accounts = sqlx::query_as::<_, AdminAccount>(&format!(
            "SELECT {} FROM admin_accounts ORDER BY username",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admin_accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn update_password(&self, id: StringUuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE admin_accounts SET password_hash = ?, updated_at = NOW() WHERE id = ?",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Admin {} not found", id)));
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: StringUuid) -> Result<()> {
        sqlx::query("UPDATE admin_accounts SET last_login_at = NOW() WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM admin_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Admin {} not found", id)));
        }
        Ok(())
    }
}
