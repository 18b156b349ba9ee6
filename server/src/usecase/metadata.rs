//! `Upload-Metadata` decoding: comma-separated `key base64value` pairs.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{UploadError, UploadResult};

pub type MetadataFields = HashMap<String, String>;

/// Decode the wire format into a field map. An empty header yields an empty
/// map; whether that is acceptable is up to the target kind.
pub fn parse_upload_metadata(raw: &str) -> UploadResult<MetadataFields> {
    let mut fields = MetadataFields::new();
    if raw.trim().is_empty() {
        return Ok(fields);
    }

    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            return Err(UploadError::Validation("empty metadata pair".into()));
        }

        let (key, encoded) = match pair.split_once(' ') {
            Some((key, value)) => (key, value.trim()),
            None => (pair, ""),
        };
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(UploadError::Validation(format!("invalid metadata key '{key}'")));
        }

        let value = if encoded.is_empty() {
            String::new()
        } else {
            let bytes = STANDARD.decode(encoded).map_err(|_| {
                UploadError::Validation(format!("metadata field '{key}' is not valid base64"))
            })?;
            String::from_utf8(bytes).map_err(|_| {
                UploadError::Validation(format!("metadata field '{key}' is not valid UTF-8"))
            })?
        };

        if fields.insert(key.to_string(), value).is_some() {
            return Err(UploadError::Validation(format!("duplicate metadata field '{key}'")));
        }
    }

    Ok(fields)
}

/// Encode fields in the wire format. Used by clients and tests.
pub fn encode_upload_metadata<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key} {}", STANDARD.encode(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

/// A trimmed text field with a length bound in characters. Falls back to
/// `fallback` when the field is absent.
pub fn text_field(
    fields: &MetadataFields,
    key: &str,
    min: usize,
    max: usize,
    fallback: Option<&str>,
) -> UploadResult<String> {
    let value = match fields.get(key) {
        Some(v) => v.trim().to_string(),
        None => match fallback {
            Some(existing) => return Ok(existing.to_string()),
            None => {
                return Err(UploadError::Validation(format!(
                    "missing required metadata field '{key}'"
                )))
            }
        },
    };

    let len = value.chars().count();
    if len < min || len > max {
        return Err(UploadError::Validation(format!(
            "metadata field '{key}' must be {min}-{max} characters"
        )));
    }
    Ok(value)
}

/// An integer field within `min..=max`, with the same fallback rule as [`text_field`].
pub fn int_field(
    fields: &MetadataFields,
    key: &str,
    min: i32,
    max: i32,
    fallback: Option<i32>,
) -> UploadResult<i32> {
    let Some(raw) = fields.get(key) else {
        return fallback.ok_or_else(|| {
            UploadError::Validation(format!("missing required metadata field '{key}'"))
        });
    };
    let value: i32 = raw.trim().parse().map_err(|_| {
        UploadError::Validation(format!("metadata field '{key}' must be a number"))
    })?;
    if value < min || value > max {
        return Err(UploadError::Validation(format!(
            "metadata field '{key}' must be between {min} and {max}"
        )));
    }
    Ok(value)
}
