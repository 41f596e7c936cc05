//! Request validation.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::envelope::ResetPasswordPayload;
use crate::{Error, Result};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)+$",
    )
    .expect("email pattern compiles")
});

/// Check that `email` looks like an address.
pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    match email.split_once('@') {
        Some((local, _)) if local.len() > 64 => false,
        Some(_) => EMAIL_PATTERN.is_match(email),
        None => false,
    }
}

/// Parse and validate a reset-password request body.
pub fn parse_reset_request(body: &[u8]) -> Result<ResetPasswordPayload> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| Error::Validation("body is not valid JSON".to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| Error::Validation("body must be a JSON object".to_string()))?;

    let email = match object.get("email") {
        None | Some(Value::Null) => {
            return Err(Error::Validation("email is required".to_string()));
        }
        Some(Value::String(email)) => email.trim(),
        Some(_) => return Err(Error::Validation("email must be a string".to_string())),
    };

    if !validate_email(email) {
        return Err(Error::Validation("email is not a valid address".to_string()));
    }

    Ok(ResetPasswordPayload::new(email))
}
