//! Email template and server-config repository
//!
//! Templates and server configs are keyed `(app_id NULLABLE, email_type)`;
//! a NULL app_id row is the global default.

use super::map_unique_violation;
use crate::domain::{
    EmailServerConfig, EmailTemplate, StringUuid, UpsertEmailServerConfigInput,
    UpsertEmailTemplateInput,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailRepository: Send + Sync {
    async fn upsert_template(&self, input: &UpsertEmailTemplateInput) -> Result<EmailTemplate>;
    /// `app_id = None` looks up the global default row
    async fn find_template(
        &self,
        app_id: Option<StringUuid>,
        email_type: &str,
    ) -> Result<Option<EmailTemplate>>;
    async fn list_templates(&self, app_id: Option<StringUuid>) -> Result<Vec<EmailTemplate>>;
    async fn delete_template(&self, id: StringUuid) -> Result<()>;

    async fn upsert_server_config(
        &self,
        input: &UpsertEmailServerConfigInput,
    ) -> Result<EmailServerConfig>;
    async fn find_server_config(&self, id: StringUuid) -> Result<Option<EmailServerConfig>>;
    /// Default server config for an app (`None` for the global default)
    async fn find_default_server_config(
        &self,
        app_id: Option<StringUuid>,
    ) -> Result<Option<EmailServerConfig>>;
    async fn list_server_configs(&self) -> Result<Vec<EmailServerConfig>>;
    async fn delete_server_config(&self, id: StringUuid) -> Result<()>;
}

pub struct EmailRepositoryImpl {
    pool: MySqlPool,
}

impl EmailRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const TEMPLATE_COLUMNS: &str = "id, app_id, email_type, subject, html_body, text_body, \
                                server_config_id, created_at, updated_at";
const SERVER_COLUMNS: &str = "id, app_id, name, host, port, username, password, from_address, \
                              use_tls, is_default, created_at, updated_at";

#[async_trait]
impl EmailRepository for EmailRepositoryImpl {
    async fn upsert_template(&self, input: &UpsertEmailTemplateInput) -> Result<EmailTemplate> {
        let id = StringUuid::new_v4();
        let email_type = input.email_type.as_str();

        sqlx::query(
            r#"
            INSERT INTO email_templates
                (id, app_id, email_type, subject, html_body, text_body, server_config_id,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            ON DUPLICATE KEY UPDATE
                subject = VALUES(subject),
                html_body = VALUES(html_body),
                text_body = VALUES(text_body),
                server_config_id = VALUES(server_config_id),
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(input.app_id)
        .bind(email_type)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(input.server_config_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Template already exists"))?;

        self.find_template(input.app_id, email_type)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to upsert template")))
    }

    async fn find_template(
        &self,
        app_id: Option<StringUuid>,
        email_type: &str,
    ) -> Result<Option<EmailTemplate>> {
        let sql = match app_id {
            Some(_) => format!(
                "SELECT {} FROM email_templates WHERE app_id = ? AND email_type = ?",
                TEMPLATE_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM email_templates WHERE app_id IS NULL AND email_type = ?",
                TEMPLATE_COLUMNS
            ),
        };

        let mut builder = sqlx::query_as::<_, EmailTemplate>(&sql);
        if let Some(app_id) = app_id {
            builder = builder.bind(app_id);
        }
        let template = builder.bind(email_type).fetch_optional(&self.pool).await?;

        Ok(template)
    }

    async fn list_templates(&self, app_id: Option<StringUuid>) -> Result<Vec<EmailTemplate>> {
        let sql = match app_id {
            Some(_) => format!(
                "SELECT {} FROM email_templates WHERE app_id = ? ORDER BY email_type",
                TEMPLATE_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM email_templates WHERE app_id IS NULL ORDER BY email_type",
                TEMPLATE_COLUMNS
            ),
        };

        let mut builder = sqlx::query_as::<_, EmailTemplate>(&sql);
        if let Some(app_id) = app_id {
            builder = builder.bind(app_id);
        }
        let templates = builder.fetch_all(&self.pool).await?;

        Ok(templates)
    }

    async fn delete_template(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM email_templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template {} not found", id)));
        }
        Ok(())
    }

    async fn upsert_server_config(
        &self,
        input: &UpsertEmailServerConfigInput,
    ) -> Result<EmailServerConfig> {
        let id = StringUuid::new_v4();

        // A new default displaces the previous one for the same scope
        if input.is_default {
            match input.app_id {
                Some(app_id) => {
                    sqlx::query(
                        "UPDATE email_server_configs SET is_default = false WHERE app_id = ?",
                    )
                    .bind(app_id)
                    .execute(&self.pool)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "UPDATE email_server_configs SET is_default = false WHERE app_id IS NULL",
                    )
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO email_server_configs
                (id, app_id, name, host, port, username, password, from_address, use_tls,
                 is_default, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(input.app_id)
        .bind(&input.name)
        .bind(&input.host)
        .bind(input.port)
        .bind(&input.username)
        .bind(&input.password)
        .bind(&input.from_address)
        .bind(input.use_tls)
        .bind(input.is_default)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Server config already exists"))?;

        self.find_server_config(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create server config")))
    }

    async fn find_server_config(&self, id: StringUuid) -> Result<Option<EmailServerConfig>> {
        let config = sqlx::query_as::<_, EmailServerConfig>(&format!(
            "SELECT {} FROM email_server_configs WHERE id = ?",
            SERVER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    async fn find_default_server_config(
        &self,
        app_id: Option<StringUuid>,
    ) -> Result<Option<EmailServerConfig>> {
        let sql = match app_id {
            Some(_) => format!(
                "SELECT {} FROM email_server_configs WHERE app_id = ? AND is_default = true",
                SERVER_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM email_server_configs WHERE app_id IS NULL AND is_default = true",
                SERVER_COLUMNS
            ),
        };

        let mut builder = sqlx::query_as::<_, EmailServerConfig>(&sql);
        if let Some(app_id) = app_id {
            builder = builder.bind(app_id);
        }
        let config = builder.fetch_optional(&self.pool).await?;

        Ok(config)
    }

    async fn list_server_configs(&self) -> Result<Vec<EmailServerConfig>> {
        let configs = sqlx::query_as::<_, EmailServerConfig>(&format!(
            "SELECT {} FROM email_server_configs ORDER BY name",
            SERVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    async fn delete_server_config(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM email_server_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Server config {} not found",
                id
            )));
        }
        Ok(())
    }
}
