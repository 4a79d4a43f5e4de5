//! User repository

use super::map_unique_violation;
use crate::domain::{
    CreateUserInput, ProfilePatch, StringUuid, TwoFaState, UpdateProfileInput, User,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: &CreateUserInput) -> Result<User>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<User>>;
    async fn find_by_email(&self, app_id: StringUuid, email: &str) -> Result<Option<User>>;
    async fn list_by_app(
        &self,
        app_id: StringUuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>>;
    async fn count_by_app(&self, app_id: StringUuid) -> Result<i64>;

    async fn update_password(&self, id: StringUuid, password_hash: &str) -> Result<()>;
    async fn set_email_verified(&self, id: StringUuid, verified: bool) -> Result<()>;
    async fn set_active(&self, id: StringUuid, active: bool) -> Result<()>;
    async fn update_profile(&self, id: StringUuid, input: &UpdateProfileInput) -> Result<User>;
    /// Change the address and reset the verification flag in one statement
    async fn update_email(&self, id: StringUuid, email: &str) -> Result<()>;
    async fn update_two_fa(&self, id: StringUuid, state: &TwoFaState) -> Result<()>;
    async fn set_recovery_codes(&self, id: StringUuid, codes_json: &str) -> Result<()>;
    /// Fill only fields that are currently empty (federated linking rule)
    async fn fill_empty_profile(&self, id: StringUuid, patch: &ProfilePatch) -> Result<()>;
    async fn touch_last_login(&self, id: StringUuid) -> Result<()>;
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct UserRepositoryImpl {
    pool: MySqlPool,
}

impl UserRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, app_id, email, password_hash, email_verified, is_active, \
                       two_fa_enabled, two_fa_method, two_fa_secret, two_fa_recovery_codes, \
                       first_name, last_name, picture, locale, last_login_at, \
                       created_at, updated_at";

#[async_trait]
impl UserRepository for UserRepositoryImpl {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO users
                (id, app_id, email, password_hash, email_verified, is_active,
                 two_fa_enabled, first_name, last_name, picture, locale,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, true, false, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(input.app_id)
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(input.email_verified)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.picture)
        .bind(&input.locale)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "A user with this email already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create user")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    async fn find_by_email(&self, app_id: StringUuid, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE app_id = ? AND email = ?",
            COLUMNS
        ))
        .bind(app_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_by_app(
        &self,
        app_id: StringUuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE app_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(app_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn count_by_app(&self, app_id: StringUuid) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE app_id = ?")
            .bind(app_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn update_password(&self, id: StringUuid, password_hash: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = ?, updated_at = NOW() WHERE id = ?")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn set_email_verified(&self, id: StringUuid, verified: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET email_verified = ?, updated_at = NOW() WHERE id = ?")
                .bind(verified)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn set_active(&self, id: StringUuid, active: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET is_active = ?, updated_at = NOW() WHERE id = ?")
                .bind(active)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn update_profile(&self, id: StringUuid, input: &UpdateProfileInput) -> Result<User> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        let first_name = input.first_name.as_ref().or(existing.first_name.as_ref());
        let last_name = input.last_name.as_ref().or(existing.last_name.as_ref());
        let picture = input.picture.as_ref().or(existing.picture.as_ref());
        let locale = input.locale.as_ref().or(existing.locale.as_ref());

        sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?, last_name = ?, picture = ?, locale = ?, updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(picture)
        .bind(locale)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update user")))
    }

    async fn update_email(&self, id: StringUuid, email: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET email = ?, email_verified = false, updated_at = NOW() WHERE id = ?",
        )
        .bind(email)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "A user with this email already exists"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn update_two_fa(&self, id: StringUuid, state: &TwoFaState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET two_fa_enabled = ?, two_fa_method = ?, two_fa_secret = ?,
                two_fa_recovery_codes = ?, updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(state.enabled)
        .bind(&state.method)
        .bind(&state.secret)
        .bind(&state.recovery_codes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn set_recovery_codes(&self, id: StringUuid, codes_json: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET two_fa_recovery_codes = ?, updated_at = NOW() WHERE id = ?",
        )
        .bind(codes_json)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    async fn fill_empty_profile(&self, id: StringUuid, patch: &ProfilePatch) -> Result<()> {
        // COALESCE keeps existing non-empty values; incoming data only fills
        // gaps so repeated federated logins never clobber user edits.
        sqlx::query(
            r#"
            UPDATE users
            SET first_name = COALESCE(NULLIF(first_name, ''), ?),
                last_name = COALESCE(NULLIF(last_name, ''), ?),
                picture = COALESCE(NULLIF(picture, ''), ?),
                locale = COALESCE(NULLIF(locale, ''), ?),
                updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.picture)
        .bind(&patch.locale)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_last_login(&self, id: StringUuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }
}
