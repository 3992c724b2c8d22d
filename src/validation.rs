use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{AdminError, Result};

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 10_000;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex")
});

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,50}$").expect("valid username regex"));

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(message: String) -> AdminError {
    AdminError::Validation(message)
}

pub fn required_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} is required")));
    }
    if value.chars().count() > max_len {
        return Err(invalid(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(())
}

pub fn optional_text(field: &str, value: Option<&str>, max_len: usize) -> Result<()> {
    match value {
        Some(value) if value.chars().count() > max_len => Err(invalid(format!(
            "{field} must be at most {max_len} characters"
        ))),
        _ => Ok(()),
    }
}

/// Same as [`required_text`] but only when the field is present, for partial updates.
pub fn present_text(field: &str, value: Option<&str>, max_len: usize) -> Result<()> {
    match value {
        Some(value) => required_text(field, value, max_len),
        None => Ok(()),
    }
}

pub fn one_of(field: &str, value: Option<&str>, allowed: &[&str]) -> Result<()> {
    match value {
        Some(value) if !allowed.contains(&value) => Err(invalid(format!(
            "{field} must be one of: {}",
            allowed.join(", ")
        ))),
        _ => Ok(()),
    }
}

pub fn non_negative(field: &str, value: Option<i32>) -> Result<()> {
    match value {
        Some(value) if value < 0 => Err(invalid(format!("{field} must not be negative"))),
        _ => Ok(()),
    }
}

pub fn positive_id(field: &str, value: Option<i32>) -> Result<()> {
    match value {
        Some(value) if value <= 0 => Err(invalid(format!("{field} must be a positive id"))),
        _ => Ok(()),
    }
}

pub fn json_array(field: &str, value: Option<&Value>) -> Result<()> {
    match value {
        Some(value) if !value.is_array() => Err(invalid(format!("{field} must be an array"))),
        _ => Ok(()),
    }
}

pub fn json_object(field: &str, value: Option<&Value>) -> Result<()> {
    match value {
        Some(value) if !value.is_object() => Err(invalid(format!("{field} must be an object"))),
        _ => Ok(()),
    }
}

pub fn email(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) if !EMAIL_RE.is_match(value.trim()) => {
            Err(invalid(format!("{field} must be a valid email address")))
        }
        _ => Ok(()),
    }
}

pub fn username(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) if !USERNAME_RE.is_match(value) => Err(invalid(format!(
            "{field} must be 3-50 characters of letters, digits, '.', '_' or '-'"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_rules() {
        assert!(required_text("name", "  ", 10).is_err());
        assert!(required_text("name", "ok", 10).is_ok());
        assert!(required_text("name", "abcdefghijk", 10).is_err());
        assert!(present_text("name", None, 10).is_ok());
        assert!(present_text("name", Some(""), 10).is_err());
    }

    #[test]
    fn enum_json_and_identity_rules() {
        assert!(one_of("status", Some("draft"), &["draft", "published"]).is_ok());
        let err = one_of("status", Some("gone"), &["draft", "published"]).unwrap_err();
        assert_eq!(err.to_string(), "status must be one of: draft, published");

        assert!(json_array("buttons", Some(&json!([]))).is_ok());
        assert!(json_array("buttons", Some(&json!({}))).is_err());
        assert!(json_object("dimensions", Some(&json!([]))).is_err());

        assert!(email("email", Some("tech@example.com")).is_ok());
        assert!(email("email", Some("not-an-email")).is_err());
        assert!(username("username", Some("ab")).is_err());
        assert!(username("username", Some("field.tech_01")).is_ok());
        assert!(positive_id("device_id", Some(0)).is_err());
    }
}
