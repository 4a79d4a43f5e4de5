//! Built-in email templates
//!
//! Final safety net when neither an app-specific nor a global template row
//! exists. Variables use `{{name}}` syntax and are substituted verbatim.

use crate::domain::EmailType;
use std::collections::HashMap;

/// Substitute `{{name}}` placeholders from the variable map
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in variables {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

/// Built-in subject line for an email type
pub fn builtin_subject(email_type: EmailType) -> &'static str {
    match email_type {
        EmailType::EmailVerification => "Verify your email address",
        EmailType::PasswordReset => "Reset your password",
        EmailType::TwoFaCode => "Your verification code: {{code}}",
        EmailType::Welcome => "Welcome to {{app_name}}!",
        EmailType::AccountDeactivated => "Your account has been deactivated",
        EmailType::PasswordChanged => "Your password has been changed",
    }
}

/// Built-in plain-text body for an email type
pub fn builtin_text(email_type: EmailType) -> &'static str {
    match email_type {
        EmailType::EmailVerification => {
            "Hello,\n\nPlease confirm your email address for {{app_name}} by opening the link \
             below:\n\n{{verification_url}}\n\nThis link expires in 24 hours. If you did not \
             sign up, you can ignore this message.\n"
        }
        EmailType::PasswordReset => {
            "Hello,\n\nA password reset was requested for your {{app_name}} account. Open the \
             link below to choose a new password:\n\n{{reset_url}}\n\nThis link expires in one \
             hour. If you did not request a reset, you can ignore this message.\n"
        }
        EmailType::TwoFaCode => {
            "Hello,\n\nYour {{app_name}} verification code is:\n\n{{code}}\n\nThe code expires \
             in 5 minutes. If you did not try to sign in, change your password immediately.\n"
        }
        EmailType::Welcome => {
            "Hello {{first_name}},\n\nYour email address is verified and your {{app_name}} \
             account is ready to use.\n"
        }
        EmailType::AccountDeactivated => {
            "Hello,\n\nYour {{app_name}} account has been deactivated. Contact support if you \
             believe this is an error.\n"
        }
        EmailType::PasswordChanged => {
            "Hello,\n\nThe password for your {{app_name}} account was just changed. If this \
             was not you, reset your password immediately and contact support.\n"
        }
    }
}

/// Built-in HTML body: the text body with minimal markup
pub fn builtin_html(email_type: EmailType) -> String {
    let text = builtin_text(email_type);
    format!(
        "<html><body><p>{}</p></body></html>",
        text.trim().replace("\n\n", "</p><p>").replace('\n', "<br>")
    )
}
