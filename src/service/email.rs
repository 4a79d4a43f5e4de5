//! Email orchestrator
//!
//! For each send request, resolves `(application, email type)` to a
//! template (app override → global default → built-in) and a server config
//! (template-pinned → app default → global default → dev sink), renders
//! with `{{variable}}` substitution, and dispatches.

use crate::config::EmailConfig;
use crate::domain::{EmailServerConfig, EmailType, StringUuid};
use crate::email::{self, templates, RenderedEmail};
use crate::error::Result;
use crate::repository::{ApplicationRepository, EmailRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The seam services send mail through; tests substitute a recorder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        app_id: Option<StringUuid>,
        email_type: EmailType,
        recipient: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()>;
}

pub struct EmailOrchestrator {
    emails: Arc<dyn EmailRepository>,
    applications: Arc<dyn ApplicationRepository>,
    config: EmailConfig,
}

struct ResolvedTemplate {
    subject: String,
    html_body: String,
    text_body: String,
    server_config_id: Option<StringUuid>,
}

impl EmailOrchestrator {
    pub fn new(
        emails: Arc<dyn EmailRepository>,
        applications: Arc<dyn ApplicationRepository>,
        config: EmailConfig,
    ) -> Self {
        Self {
            emails,
            applications,
            config,
        }
    }

    /// App-specific template, then global default, then the built-in
    async fn resolve_template(
        &self,
        app_id: Option<StringUuid>,
        email_type: EmailType,
    ) -> Result<ResolvedTemplate> {
        if let Some(app_id) = app_id {
            if let Some(t) = self.emails.find_template(Some(app_id), email_type.as_str()).await? {
                return Ok(ResolvedTemplate {
                    subject: t.subject,
                    html_body: t.html_body,
                    text_body: t.text_body,
                    server_config_id: t.server_config_id,
                });
            }
        }
        if let Some(t) = self.emails.find_template(None, email_type.as_str()).await? {
            return Ok(ResolvedTemplate {
                subject: t.subject,
                html_body: t.html_body,
                text_body: t.text_body,
                server_config_id: t.server_config_id,
            });
        }
        Ok(ResolvedTemplate {
            subject: templates::builtin_subject(email_type).to_string(),
            html_body: templates::builtin_html(email_type),
            text_body: templates::builtin_text(email_type).to_string(),
            server_config_id: None,
        })
    }

    /// Template-pinned config, then app default, then global default
    async fn resolve_server_config(
        &self,
        app_id: Option<StringUuid>,
        pinned: Option<StringUuid>,
    ) -> Result<Option<EmailServerConfig>> {
        if let Some(id) = pinned {
            if let Some(config) = self.emails.find_server_config(id).await? {
                return Ok(Some(config));
            }
            tracing::warn!(config_id = %id, "Pinned server config missing, falling back");
        }
        if let Some(app_id) = app_id {
            if let Some(config) = self.emails.find_default_server_config(Some(app_id)).await? {
                return Ok(Some(config));
            }
        }
        self.emails.find_default_server_config(None).await
    }

    /// Enrich the variable map with the application name when absent
    async fn fill_app_name(
        &self,
        app_id: Option<StringUuid>,
        variables: &mut HashMap<String, String>,
    ) {
        if variables.contains_key("app_name") {
            return;
        }
        if let Some(app_id) = app_id {
            if let Ok(Some(app)) = self.applications.find_by_id(app_id).await {
                variables.insert("app_name".to_string(), app.name);
                return;
            }
        }
        variables.insert("app_name".to_string(), "Authgate".to_string());
    }

    fn warn_unrecognized(email_type: EmailType, variables: &HashMap<String, String>) {
        for name in variables.keys() {
            if !email_type.recognized_variables().contains(&name.as_str()) {
                tracing::debug!(
                    email_type = email_type.as_str(),
                    variable = %name,
                    "Unrecognized template variable"
                );
            }
        }
    }
}

#[async_trait]
impl EmailSender for EmailOrchestrator {
    async fn send(
        &self,
        app_id: Option<StringUuid>,
        email_type: EmailType,
        recipient: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        let mut variables = variables.clone();
        self.fill_app_name(app_id, &mut variables).await;
        Self::warn_unrecognized(email_type, &variables);

        let template = self.resolve_template(app_id, email_type).await?;
        let server = self
            .resolve_server_config(app_id, template.server_config_id)
            .await?;

        let from = server
            .as_ref()
            .map(|s| s.from_address.clone())
            .unwrap_or_else(|| self.config.default_from.clone());

        let rendered = RenderedEmail {
            to: recipient.to_string(),
            from,
            subject: templates::render(&template.subject, &variables),
            html_body: templates::render(&template.html_body, &variables),
            text_body: templates::render(&template.text_body, &variables),
        };

        match server {
            Some(ref config) if !self.config.dev_mode => {
                email::send_smtp(config, &rendered).await?;
                tracing::info!(
                    email_type = email_type.as_str(),
                    to = recipient,
                    server = %config.name,
                    "Email dispatched"
                );
            }
            _ => {
                // No server configured anywhere, or development mode
                email::send_dev_sink(&rendered);
            }
        }

        Ok(())
    }
}
