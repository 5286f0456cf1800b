//! Topup notification email.
//!
//! The JSON shape of [`EmailMessage`] is consumed by the email service and
//! must stay `{"email", "subject", "body"}`.

use ledger::{Card, Topup};
use serde::{Deserialize, Serialize};

/// Topic the email service consumes topup notifications from.
pub const TOPUP_CREATED_TOPIC: &str = "email-service-topic-topup-create";

const SUBJECT: &str = "Topup Successful";

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <title>{{title}}</title>
</head>
<body style="font-family: Arial, sans-serif; background-color: #f4f4f4; padding: 24px;">
  <div style="max-width: 600px; margin: 0 auto; background: #ffffff; border-radius: 8px; padding: 32px;">
    <h1 style="color: #333333;">{{title}}</h1>
    <p style="color: #555555; line-height: 1.5;">{{message}}</p>
    <a href="{{link}}" style="display: inline-block; margin-top: 16px; padding: 12px 24px; background: #4caf50; color: #ffffff; text-decoration: none; border-radius: 4px;">{{button}}</a>
  </div>
</body>
</html>"#;

const DASHBOARD_LINK: &str = "https://payment-gateway.example.com/dashboard";

/// Payload published for a successful topup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub email: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Builds the success email for `topup` on `card`.
    pub fn topup_success(card: &Card, topup: &Topup) -> Self {
        let message = format!(
            "Your topup of {} via {} for card {} has been processed successfully.",
            topup.amount,
            topup.method,
            card.card_number.masked()
        );
        Self {
            email: card.email.clone(),
            subject: SUBJECT.to_string(),
            body: render(SUBJECT, &message, "Go to Dashboard", DASHBOARD_LINK),
        }
    }

    /// Encodes the message as the JSON bytes put on the wire.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn render(title: &str, message: &str, button: &str, link: &str) -> String {
    TEMPLATE
        .replace("{{title}}", &escape_html(title))
        .replace("{{message}}", &escape_html(message))
        .replace("{{button}}", &escape_html(button))
        .replace("{{link}}", &escape_html(link))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
