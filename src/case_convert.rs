//! Field-name casing between the storage/wire convention (snake_case) and the
//! admin frontend convention (camelCase).
//!
//! Conversion walks any JSON value: object keys are renamed, arrays are mapped
//! element-wise, everything else is returned as-is. A fixed dictionary pins the
//! well-known column names in both directions and is consulted before the
//! generic rule.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

const FIELD_OVERRIDES: &[(&str, &str)] = &[
    ("created_at", "createdAt"),
    ("updated_at", "updatedAt"),
    ("is_active", "isActive"),
    ("is_default", "isDefault"),
    ("is_popular", "isPopular"),
    ("device_id", "deviceId"),
    ("problem_id", "problemId"),
    ("step_id", "stepId"),
    ("remote_id", "remoteId"),
    ("user_id", "userId"),
    ("session_id", "sessionId"),
    ("entity_id", "entityId"),
    ("entity_type", "entityType"),
    ("tv_interface_id", "tvInterfaceId"),
    ("interface_type", "interfaceType"),
    ("step_number", "stepNumber"),
    ("order_index", "orderIndex"),
    ("image_url", "imageUrl"),
    ("media_url", "mediaUrl"),
    ("screenshot_url", "screenshotUrl"),
    ("display_name", "displayName"),
    ("last_login_at", "lastLoginAt"),
    ("usage_count", "usageCount"),
    ("estimated_minutes", "estimatedMinutes"),
    ("estimated_seconds", "estimatedSeconds"),
    ("duration_seconds", "durationSeconds"),
    ("highlight_button", "highlightButton"),
    ("highlight_area", "highlightArea"),
    ("highlight_areas", "highlightAreas"),
    ("clickable_areas", "clickableAreas"),
    ("action_type", "actionType"),
    ("total_pages", "totalPages"),
    ("include_inactive", "includeInactive"),
];

static SNAKE_TO_CAMEL: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| FIELD_OVERRIDES.iter().copied().collect());

static CAMEL_TO_SNAKE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    FIELD_OVERRIDES
        .iter()
        .map(|(snake, camel)| (*camel, *snake))
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCase {
    #[default]
    Snake,
    Camel,
}

impl KeyCase {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "snake" | "snake_case" => Some(Self::Snake),
            "camel" | "camelcase" => Some(Self::Camel),
            _ => None,
        }
    }
}

/// `device_id` -> `deviceId`. An underscore is only consumed when a lowercase
/// ASCII letter follows it.
pub fn snake_to_camel(key: &str) -> String {
    if let Some(pinned) = SNAKE_TO_CAMEL.get(key) {
        return (*pinned).to_string();
    }

    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if let Some(next) = chars.peek().copied().filter(char::is_ascii_lowercase) {
                out.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// `deviceId` -> `device_id`. Every uppercase ASCII letter, the first one
/// included, becomes `_` plus its lowercase form.
pub fn camel_to_snake(key: &str) -> String {
    if let Some(pinned) = CAMEL_TO_SNAKE.get(key) {
        return (*pinned).to_string();
    }

    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn rename_keys(value: &Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (rename(key), rename_keys(inner, rename)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| rename_keys(item, rename)).collect())
        }
        other => other.clone(),
    }
}

fn rename_keys_owned(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (rename(&key), rename_keys_owned(inner, rename)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| rename_keys_owned(item, rename))
                .collect(),
        ),
        other => other,
    }
}

pub fn keys_to_camel(value: &Value) -> Value {
    rename_keys(value, snake_to_camel)
}

pub fn keys_to_snake(value: &Value) -> Value {
    rename_keys(value, camel_to_snake)
}

/// Consuming form of [`keys_to_camel`], used on response bodies.
pub fn into_camel(value: Value) -> Value {
    rename_keys_owned(value, snake_to_camel)
}

/// Consuming form of [`keys_to_snake`], used on request bodies.
pub fn into_snake(value: Value) -> Value {
    rename_keys_owned(value, camel_to_snake)
}

pub fn convert_keys(value: &Value, case: KeyCase) -> Value {
    match case {
        KeyCase::Snake => keys_to_snake(value),
        KeyCase::Camel => keys_to_camel(value),
    }
}
