//! Email dispatch: SMTP transport and the development log sink

pub mod templates;

use crate::domain::EmailServerConfig;
use crate::error::{AppError, Result};
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// A fully rendered message ready for dispatch
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Send over SMTP using the resolved server config
pub async fn send_smtp(config: &EmailServerConfig, email: &RenderedEmail) -> Result<()> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|_| AppError::Email(format!("Invalid from address: {}", email.from)))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|_| AppError::Email(format!("Invalid recipient address: {}", email.to)))?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(&email.subject)
        .multipart(MultiPart::alternative().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(email.text_body.clone()),
        ).singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone()),
        ))
        .map_err(|e| AppError::Email(format!("Failed to build message: {}", e)))?;

    let mut builder = if config.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AppError::Email(format!("SMTP relay setup failed: {}", e)))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
    };
    builder = builder.port(config.port);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }

    let transport = builder.build();
    transport
        .send(message)
        .await
        .map_err(|e| AppError::Email(format!("SMTP send failed: {}", e)))?;

    Ok(())
}

/// Development sink: log instead of dispatching
pub fn send_dev_sink(email: &RenderedEmail) {
    tracing::info!(
        to = %email.to,
        subject = %email.subject,
        body = %email.text_body,
        "Email (dev sink, not dispatched)"
    );
}
