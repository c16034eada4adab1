//! Parameter type inference and normalization.
//!
//! Callers supply loosely-typed JSON parameter bags; the storage layer
//! needs concrete scalars to bind safely. [`infer_value`] bridges the two
//! with a fixed precedence, and [`normalize_json_params`] applies the
//! `@`-prefix rule, the name pattern, and optional one-way hashing of
//! listed fields.
//!
//! The inference precedence is part of the gateway's contract and must not
//! be reordered: string values try datetime, then i32, then i64, then f64,
//! then bool, then UUID, and fall back to the verbatim text. A date-looking
//! numeric string therefore becomes a datetime, reproducibly.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{GatewayError, Result};
use crate::models::{FieldValue, JsonMap, ParamMap};
use crate::security::{SecretHasher, looks_hashed};

/// Parameter names must match this after the leading `@` is normalized on.
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^@?\w+$").expect("Invalid parameter name pattern"))
}

/// Date/time formats accepted by string inference, tried after RFC 3339.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_datetime(text: &str) -> Option<chrono::NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_time(chrono::NaiveTime::MIN));
    }
    None
}

/// Infers a typed scalar from an untyped JSON value.
///
/// - Null stays null; booleans stay booleans.
/// - Numbers take the smallest adequate type: i32, then i64, then f64.
/// - Strings try, in order: datetime, i32, i64, f64, bool, UUID; the first
///   successful parse wins, otherwise the original text is kept verbatim.
/// - Arrays and objects are kept as opaque serialized text; there is no
///   recursive typing.
pub fn infer_value(value: &serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Null => FieldValue::Null,
        serde_json::Value::Bool(b) => FieldValue::Bool(*b),
        serde_json::Value::Number(n) => infer_number(n),
        serde_json::Value::String(s) => infer_text(s),
        other => FieldValue::Raw(other.to_string()),
    }
}

fn infer_number(number: &serde_json::Number) -> FieldValue {
    if let Some(wide) = number.as_i64() {
        return match i32::try_from(wide) {
            Ok(narrow) => FieldValue::Int(narrow),
            Err(_) => FieldValue::BigInt(wide),
        };
    }
    if let Some(float) = number.as_f64() {
        return FieldValue::Double(float);
    }
    FieldValue::Raw(number.to_string())
}

/// Infers a typed scalar from raw text, using the string precedence above.
///
/// Also used by the storage drivers to type key values arriving as URL
/// path segments.
pub fn infer_text(text: &str) -> FieldValue {
    if let Some(dt) = parse_datetime(text) {
        return FieldValue::DateTime(dt);
    }
    if let Ok(v) = text.parse::<i32>() {
        return FieldValue::Int(v);
    }
    if let Ok(v) = text.parse::<i64>() {
        return FieldValue::BigInt(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return FieldValue::Double(v);
    }
    if text.eq_ignore_ascii_case("true") {
        return FieldValue::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return FieldValue::Bool(false);
    }
    if let Ok(v) = text.parse::<uuid::Uuid>() {
        return FieldValue::Uuid(v);
    }
    FieldValue::Text(text.to_string())
}

/// Normalizes a parameter name: validates it against `^@?\w+$` and ensures
/// the leading `@`.
///
/// # Errors
/// Returns `InvalidArgument` naming the parameter when the pattern does not
/// match.
pub fn normalize_name(raw: &str) -> Result<String> {
    if !name_pattern().is_match(raw) {
        return Err(GatewayError::invalid_argument(format!(
            "invalid parameter name '{raw}'"
        )));
    }
    if raw.starts_with('@') {
        Ok(raw.to_string())
    } else {
        Ok(format!("@{raw}"))
    }
}

/// Converts a raw JSON parameter bag into a validated, typed parameter map.
///
/// Every name is `@`-prefixed and pattern-checked, every value runs through
/// [`infer_value`], and fields listed in `encrypt_fields` are one-way
/// hashed when they hold a non-empty string that does not already look like
/// a hash. Listed fields absent from the map are silently skipped.
///
/// Duplicate names after prefixing overwrite in place.
pub fn normalize_json_params(
    raw: &JsonMap,
    encrypt_fields: Option<&[String]>,
    hasher: &SecretHasher,
) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    for (name, value) in raw {
        params.insert(normalize_name(name)?, infer_value(value));
    }
    if let Some(fields) = encrypt_fields {
        hash_listed_fields(&mut params, fields, hasher)?;
    }
    Ok(params)
}

/// Normalizes an already-typed parameter map: name rules apply, values pass
/// through unchanged.
///
/// Idempotent: running it over its own output yields an identical map.
pub fn normalize_typed_params(
    raw: ParamMap,
    encrypt_fields: Option<&[String]>,
    hasher: &SecretHasher,
) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    for (name, value) in raw {
        params.insert(normalize_name(&name)?, value);
    }
    if let Some(fields) = encrypt_fields {
        hash_listed_fields(&mut params, fields, hasher)?;
    }
    Ok(params)
}

/// Normalizes an encrypt-field list: entries trimmed, blanks dropped, an
/// empty result collapses to `None`.
pub fn normalize_encrypt_fields(fields: Option<&[String]>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = fields?
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// One-way hashes the listed fields in place.
///
/// Field names match parameters case-insensitively (with or without the
/// `@` prefix). Only non-empty string values that do not already look
/// hashed are replaced; everything else is left untouched.
fn hash_listed_fields(
    params: &mut ParamMap,
    fields: &[String],
    hasher: &SecretHasher,
) -> Result<()> {
    for field in fields {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            continue;
        }
        let target = if trimmed.starts_with('@') {
            trimmed.to_lowercase()
        } else {
            format!("@{}", trimmed.to_lowercase())
        };
        let Some(key) = params
            .keys()
            .find(|k| k.to_lowercase() == target)
            .cloned()
        else {
            continue;
        };
        let plain = match params.get(&key) {
            Some(FieldValue::Text(text)) if !text.is_empty() && !looks_hashed(text) => {
                text.clone()
            }
            _ => continue,
        };
        let hashed = hasher.hash(&plain)?;
        params.insert(key, FieldValue::Text(hashed));
    }
    Ok(())
}
