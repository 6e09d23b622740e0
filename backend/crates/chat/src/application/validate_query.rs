//! Query Validation
//!
//! Turns an untrusted JSON payload into a [`ValidatedQuery`].
//!
//! ## Rules
//! - Only the keys `query`, `model`, `systemPrompt`, `conversationHistory`
//!   and `image` are accepted; anything else is rejected by name
//! - Every violation is collected before returning, so the caller can fix
//!   all of them at once
//! - `null` for an optional field means absent
//! - Text is stripped of C0 control characters (tab and newline survive)
//!   and otherwise kept as submitted. `query` over its bound is an error;
//!   `systemPrompt` and history text are truncated instead
//! - Image bytes are never decoded, only their encoding is checked

use serde_json::{Map, Value};

use crate::domain::value_objects::{
    ChatMessage, ChatRole, ContentPart, MessageContent, ValidatedQuery,
};

// ============================================================================
// Constants
// ============================================================================

pub const MAX_QUERY_CHARS: usize = 10_000;
pub const MAX_SYSTEM_PROMPT_CHARS: usize = 2_000;
pub const MAX_HISTORY_MESSAGES: usize = 50;
pub const MAX_HISTORY_CONTENT_CHARS: usize = 50_000;
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_KEYS: &[&str] = &[
    "query",
    "model",
    "systemPrompt",
    "conversationHistory",
    "image",
];

const IMAGE_DATA_URL_PREFIXES: &[&str] = &[
    "data:image/jpeg;base64,",
    "data:image/jpg;base64,",
    "data:image/png;base64,",
    "data:image/gif;base64,",
    "data:image/webp;base64,",
];

// ============================================================================
// Validation
// ============================================================================

/// Validate a chat payload against the model allow-list
pub fn validate(payload: &Value, allowed_models: &[&str]) -> Result<ValidatedQuery, Vec<String>> {
    let Some(object) = payload.as_object() else {
        return Err(vec!["Request body must be a JSON object".to_string()]);
    };

    let mut errors = Vec::new();

    for key in object.keys() {
        if !ALLOWED_KEYS.contains(&key.as_str()) {
            errors.push(format!("Unexpected field: {key}"));
        }
    }

    let query = validate_query_text(field(object, "query"), &mut errors);
    let model = validate_model(field(object, "model"), allowed_models, &mut errors);
    let system_prompt = validate_system_prompt(field(object, "systemPrompt"), &mut errors);
    let conversation_history = validate_history(field(object, "conversationHistory"), &mut errors);
    let image = validate_image(field(object, "image"), &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedQuery {
        query: query.unwrap_or_default(),
        model,
        system_prompt,
        conversation_history,
        image,
    })
}

/// Drop C0 control characters except `\t` and `\n`, then truncate to
/// `max_chars` characters
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| !is_stripped_control(*c))
        .take(max_chars)
        .collect()
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}') && c != '\t' && c != '\n'
}

/// Present and not `null`
fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn validate_query_text(value: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
    let Some(value) = value else {
        errors.push("query is required".to_string());
        return None;
    };
    let Some(raw) = value.as_str() else {
        errors.push("query must be a string".to_string());
        return None;
    };

    // One past the bound is enough to detect overflow
    let query = sanitize_text(raw, MAX_QUERY_CHARS + 1);
    if query.trim().is_empty() {
        errors.push("query must not be empty".to_string());
        return None;
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        errors.push(format!(
            "query must be at most {MAX_QUERY_CHARS} characters"
        ));
        return None;
    }
    Some(query)
}

fn validate_model(
    value: Option<&Value>,
    allowed_models: &[&str],
    errors: &mut Vec<String>,
) -> Option<String> {
    let value = value?;
    match value.as_str() {
        Some(model) if allowed_models.contains(&model) => Some(model.to_string()),
        Some(model) => {
            errors.push(format!("model is not supported: {model}"));
            None
        }
        None => {
            errors.push("model must be a string".to_string());
            None
        }
    }
}

fn validate_system_prompt(value: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
    let value = value?;
    match value.as_str() {
        Some(prompt) => Some(sanitize_text(prompt, MAX_SYSTEM_PROMPT_CHARS)),
        None => {
            errors.push("systemPrompt must be a string".to_string());
            None
        }
    }
}

fn validate_history(value: Option<&Value>, errors: &mut Vec<String>) -> Vec<ChatMessage> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        errors.push("conversationHistory must be an array".to_string());
        return Vec::new();
    };
    if items.len() > MAX_HISTORY_MESSAGES {
        errors.push(format!(
            "conversationHistory must contain at most {MAX_HISTORY_MESSAGES} messages"
        ));
        return Vec::new();
    }

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| validate_history_message(index, item, errors))
        .collect()
}

fn validate_history_message(
    index: usize,
    item: &Value,
    errors: &mut Vec<String>,
) -> Option<ChatMessage> {
    let Some(message) = item.as_object() else {
        errors.push(format!("conversationHistory[{index}] must be an object"));
        return None;
    };

    let role = match message.get("role").and_then(Value::as_str) {
        Some(role) => match ChatRole::parse(role) {
            Some(role) => Some(role),
            None => {
                errors.push(format!(
                    "conversationHistory[{index}].role must be one of user, assistant, system"
                ));
                None
            }
        },
        None => {
            errors.push(format!("conversationHistory[{index}].role is required"));
            None
        }
    };

    let content = match message.get("content") {
        Some(Value::String(text)) => Some(MessageContent::Text(sanitize_text(
            text,
            MAX_HISTORY_CONTENT_CHARS,
        ))),
        Some(Value::Array(parts)) => validate_parts(index, parts, errors).map(MessageContent::Parts),
        Some(_) => {
            errors.push(format!(
                "conversationHistory[{index}].content must be a string or an array of parts"
            ));
            None
        }
        None => {
            errors.push(format!("conversationHistory[{index}].content is required"));
            None
        }
    };

    Some(ChatMessage {
        role: role?,
        content: content?,
    })
}

fn validate_parts(
    index: usize,
    parts: &[Value],
    errors: &mut Vec<String>,
) -> Option<Vec<ContentPart>> {
    let mut valid = Vec::with_capacity(parts.len());
    let mut ok = true;

    for (part_index, part) in parts.iter().enumerate() {
        let kind = part.get("type").and_then(Value::as_str);
        let parsed = match kind {
            Some("text") => part
                .get("text")
                .and_then(Value::as_str)
                .map(|text| ContentPart::text(sanitize_text(text, MAX_HISTORY_CONTENT_CHARS))),
            Some("image_url") => part
                .get("image_url")
                .and_then(|image| image.get("url"))
                .and_then(Value::as_str)
                .map(ContentPart::image),
            _ => None,
        };

        match parsed {
            Some(part) => valid.push(part),
            None => {
                ok = false;
                errors.push(format!(
                    "conversationHistory[{index}].content[{part_index}] must be a text or image_url part"
                ));
            }
        }
    }

    ok.then_some(valid)
}

fn validate_image(value: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
    let value = value?;
    let Some(image) = value.as_str() else {
        errors.push("image must be a string".to_string());
        return None;
    };
    if image.len() > MAX_IMAGE_BYTES {
        errors.push("image must be at most 10MB".to_string());
        return None;
    }
    if !is_valid_image_encoding(image) {
        errors.push(
            "image must be a base64 data URL (jpeg, jpg, png, gif, webp) or raw base64".to_string(),
        );
        return None;
    }
    Some(image.to_string())
}

/// `data:image/<type>;base64,<payload>` or a bare payload, where the payload
/// is `[A-Za-z0-9+/]+` followed by optional `=` padding
fn is_valid_image_encoding(image: &str) -> bool {
    let payload = match IMAGE_DATA_URL_PREFIXES
        .iter()
        .find_map(|prefix| image.strip_prefix(prefix))
    {
        Some(payload) => payload,
        None if image.starts_with("data:") => return false,
        None => image,
    };

    let body = payload.trim_end_matches('=');
    !body.is_empty()
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}
