//! Webhook request validation.
//!
//! Validates the inbound body field by field and reports every failure in a
//! machine-readable detail list: `type`, `loc`, `msg`, `input`, and `ctx`
//! where extra context applies (URL-scheme errors name the allowed schemes).

use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Schemes accepted for callback URLs.
pub const EXPECTED_SCHEMES: &[&str] = &["http", "https"];

/// A validated webhook request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub message: String,
    pub callback_url: Url,
}

/// One entry of the 422 `detail` list.
#[derive(Debug, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: String,
    pub loc: Vec<String>,
    pub msg: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Value>,
}

impl FieldError {
    fn new(kind: &str, loc: &[&str], msg: &str, input: &Value) -> Self {
        Self {
            kind: kind.to_string(),
            loc: loc.iter().map(|s| (*s).to_string()).collect(),
            msg: msg.to_string(),
            input: input.clone(),
            ctx: None,
        }
    }

    fn with_ctx(mut self, ctx: Value) -> Self {
        self.ctx = Some(ctx);
        self
    }
}

/// Validate a webhook body, collecting all per-field errors.
pub fn validate_webhook(body: &Value) -> Result<WebhookRequest, Vec<FieldError>> {
    let Some(object) = body.as_object() else {
        return Err(vec![FieldError::new(
            "model_attributes_type",
            &["body"],
            "Input should be a valid dictionary or object to extract fields from",
            body,
        )]);
    };

    let mut errors = Vec::new();

    let message = match object.get("message") {
        None => {
            errors.push(FieldError::new(
                "missing",
                &["body", "message"],
                "Field required",
                body,
            ));
            None
        }
        Some(value) => match value.as_str() {
            None => {
                errors.push(FieldError::new(
                    "string_type",
                    &["body", "message"],
                    "Input should be a valid string",
                    value,
                ));
                None
            }
            Some("") => {
                errors.push(
                    FieldError::new(
                        "string_too_short",
                        &["body", "message"],
                        "String should have at least 1 character",
                        value,
                    )
                    .with_ctx(serde_json::json!({"min_length": 1})),
                );
                None
            }
            Some(text) => Some(text.to_string()),
        },
    };

    let callback_url = match object.get("callback_url") {
        None => {
            errors.push(FieldError::new(
                "missing",
                &["body", "callback_url"],
                "Field required",
                body,
            ));
            None
        }
        Some(value) => match value.as_str() {
            None => {
                errors.push(FieldError::new(
                    "url_type",
                    &["body", "callback_url"],
                    "URL input should be a string or URL",
                    value,
                ));
                None
            }
            Some(raw) => match Url::parse(raw) {
                Err(e) => {
                    errors.push(
                        FieldError::new(
                            "url_parsing",
                            &["body", "callback_url"],
                            &format!("Input should be a valid URL, {}", e),
                            value,
                        )
                        .with_ctx(serde_json::json!({"error": e.to_string()})),
                    );
                    None
                }
                Ok(url) if !EXPECTED_SCHEMES.contains(&url.scheme()) => {
                    errors.push(
                        FieldError::new(
                            "url_scheme",
                            &["body", "callback_url"],
                            "URL scheme should be 'http' or 'https'",
                            value,
                        )
                        .with_ctx(serde_json::json!({"expected_schemes": EXPECTED_SCHEMES})),
                    );
                    None
                }
                Ok(url) => Some(url),
            },
        },
    };

    match (message, callback_url) {
        (Some(message), Some(callback_url)) if errors.is_empty() => Ok(WebhookRequest {
            message,
            callback_url,
        }),
        _ => Err(errors),
    }
}
