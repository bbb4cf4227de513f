//! Email template rendering engine.
//!
//! Handlebars templates are embedded in the binary and registered once at
//! engine construction. Each email kind has an HTML and a plain-text variant.

use crate::error::{NotificationError, NotificationResult};
use crate::models::EmailKind;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    /// HTML body content.
    pub html: String,
    /// Plain text body content.
    pub text: String,
}

/// Template engine for rendering email templates.
pub struct TemplateEngine {
    handlebars: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();

        let templates = [
            ("verification_html", VERIFICATION_HTML_TEMPLATE),
            ("verification_text", VERIFICATION_TEXT_TEMPLATE),
            ("password_reset_html", PASSWORD_RESET_HTML_TEMPLATE),
            ("password_reset_text", PASSWORD_RESET_TEXT_TEMPLATE),
        ];

        for (name, source) in templates {
            handlebars
                .register_template_string(name, source)
                .map_err(|e| {
                    NotificationError::TemplateError(format!("Failed to register {}: {}", name, e))
                })?;
        }

        Ok(Self {
            handlebars: Arc::new(handlebars),
        })
    }

    fn render<T: Serialize>(&self, template_name: &str, data: &T) -> NotificationResult<String> {
        self.handlebars
            .render(template_name, data)
            .map_err(|e| NotificationError::TemplateError(e.to_string()))
    }

    /// Render the HTML and text variants for an email kind.
    pub fn render_by_kind<T: Serialize>(
        &self,
        kind: &EmailKind,
        data: &T,
    ) -> NotificationResult<RenderedEmail> {
        debug!(kind = %kind, "Rendering email template");

        let base = kind.template_name();
        let html = self.render(&format!("{}_html", base), data)?;
        let text = self.render(&format!("{}_text", base), data)?;

        Ok(RenderedEmail { html, text })
    }
}

const VERIFICATION_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="margin:0;padding:0;background:#f4f4f7;font-family:Helvetica,Arial,sans-serif;">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0">
    <tr><td align="center" style="padding:32px 16px;">
      <table role="presentation" width="560" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;padding:32px;">
        <tr><td>
          <h1 style="font-size:20px;color:#222;">Welcome, {{name}}!</h1>
          <p style="font-size:15px;color:#444;line-height:1.5;">
            Thanks for signing up. Please confirm your email address to
            activate your account.
          </p>
          <p style="text-align:center;margin:32px 0;">
            <a href="{{link}}" style="background:#2f67f6;color:#ffffff;text-decoration:none;padding:12px 28px;border-radius:6px;font-size:15px;">Verify email address</a>
          </p>
          <p style="font-size:13px;color:#888;line-height:1.5;">
            This link expires in {{expiry_hours}} hours. If the button does
            not work, copy and paste this URL into your browser:<br>
            <a href="{{link}}" style="color:#2f67f6;">{{link}}</a>
          </p>
          <p style="font-size:13px;color:#888;">
            If you did not create an account, you can ignore this email.
          </p>
        </td></tr>
      </table>
    </td></tr>
  </table>
</body>
</html>"#;

const VERIFICATION_TEXT_TEMPLATE: &str = r#"Welcome, {{name}}!

Thanks for signing up. Please confirm your email address to activate your
account by opening the link below:

{{link}}

This link expires in {{expiry_hours}} hours.

If you did not create an account, you can ignore this email.
"#;

const PASSWORD_RESET_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="margin:0;padding:0;background:#f4f4f7;font-family:Helvetica,Arial,sans-serif;">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0">
    <tr><td align="center" style="padding:32px 16px;">
      <table role="presentation" width="560" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;padding:32px;">
        <tr><td>
          <h1 style="font-size:20px;color:#222;">Password reset</h1>
          <p style="font-size:15px;color:#444;line-height:1.5;">
            Hi {{name}}, we received a request to reset your password. Click
            the button below to choose a new one.
          </p>
          <p style="text-align:center;margin:32px 0;">
            <a href="{{link}}" style="background:#2f67f6;color:#ffffff;text-decoration:none;padding:12px 28px;border-radius:6px;font-size:15px;">Reset password</a>
          </p>
          <p style="font-size:13px;color:#888;line-height:1.5;">
            This link expires in {{expiry_hours}} hour(s). If the button does
            not work, copy and paste this URL into your browser:<br>
            <a href="{{link}}" style="color:#2f67f6;">{{link}}</a>
          </p>
          <p style="font-size:13px;color:#888;">
            If you did not request a password reset, no action is needed.
            Your password remains unchanged.
          </p>
        </td></tr>
      </table>
    </td></tr>
  </table>
</body>
</html>"#;

const PASSWORD_RESET_TEXT_TEMPLATE: &str = r#"Password reset

Hi {{name}}, we received a request to reset your password. Open the link
below to choose a new one:

{{link}}

This link expires in {{expiry_hours}} hour(s).

If you did not request a password reset, no action is needed. Your password
remains unchanged.
"#;
