use std::collections::HashSet;
use std::net::IpAddr;

use serde_json::Value;

use crate::config::LimitsConfig;
use crate::error::{ApiResult, AppError};

pub const MAX_TAGS: usize = 32;
pub const MAX_CONFIG_BYTES: usize = 256 * 1024;

/// Resource names: trimmed, bounded, and restricted to a DNS-ish
/// charset so they can be embedded in rendered configs verbatim.
pub fn normalize_name(field: &str, value: &str, limits: &LimitsConfig) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} cannot be empty")));
    }
    if trimmed.len() > limits.max_field_len {
        return Err(AppError::validation(format!("{field} too long")));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::validation(format!(
            "{field} may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(trimmed.to_string())
}

/// Node IP addresses must be literal v4 or v6 addresses.
pub fn normalize_ip(value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    let parsed: IpAddr = trimmed
        .parse()
        .map_err(|_| AppError::validation("ip_address is not a valid IP address"))?;
    Ok(parsed.to_string())
}

/// Hostnames: non-empty, bounded, no whitespace, lowercased.
pub fn normalize_hostname(value: &str, limits: &LimitsConfig) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("hostname cannot be empty"));
    }
    if trimmed.len() > limits.max_field_len {
        return Err(AppError::validation("hostname too long"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(AppError::validation("hostname cannot contain whitespace"));
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn normalize_description(
    value: Option<String>,
    limits: &LimitsConfig,
) -> ApiResult<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > limits.max_field_len {
        return Err(AppError::validation("description too long"));
    }
    Ok(Some(trimmed))
}

pub fn normalize_tags(tags: Option<Vec<String>>, limits: &LimitsConfig) -> ApiResult<Vec<String>> {
    let Some(tags) = tags else {
        return Ok(Vec::new());
    };
    if tags.len() > MAX_TAGS {
        return Err(AppError::validation(format!(
            "too many tags ({} > {MAX_TAGS})",
            tags.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err(AppError::validation("tag cannot be empty"));
        }
        if trimmed.len() > limits.max_field_len {
            return Err(AppError::validation("tag too long"));
        }
        if seen.insert(trimmed.clone()) {
            normalized.push(trimmed);
        }
    }
    Ok(normalized)
}

/// Listen ports exclude 0; u16 bounds the top end at 65535.
pub fn validate_port(port: u16) -> ApiResult<u16> {
    if port == 0 {
        return Err(AppError::validation("port must be between 1 and 65535"));
    }
    Ok(port)
}

/// Stored service configs must be JSON objects with a bounded
/// serialized size; the renderer enforces the engine-specific shape.
pub fn validate_config_document(config: &Value) -> ApiResult<()> {
    if !config.is_object() {
        return Err(AppError::validation("config must be a JSON object"));
    }
    let serialized_len = serde_json::to_vec(config)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX);
    if serialized_len > MAX_CONFIG_BYTES {
        return Err(AppError::validation("config document too large"));
    }
    Ok(())
}

pub fn validate_opt_str(field: &str, value: Option<&str>, max_len: usize) -> ApiResult<()> {
    if let Some(val) = value {
        if val.trim().is_empty() {
            return Err(AppError::validation(format!("{field} cannot be empty")));
        }
        if val.len() > max_len {
            return Err(AppError::validation(format!("{field} too long")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_field_len: 255,
            agent_body_bytes: 0,
            admin_body_bytes: 0,
        }
    }

    #[test]
    fn normalize_name_rejects_bad_charset() {
        let limits = limits();
        assert!(normalize_name("name", "edge-1", &limits).is_ok());
        assert_eq!(normalize_name("name", "  edge-1 ", &limits).unwrap(), "edge-1");
        assert!(normalize_name("name", "", &limits).is_err());
        assert!(normalize_name("name", "edge 1", &limits).is_err());
        assert!(normalize_name("name", "edge/1", &limits).is_err());
    }

    #[test]
    fn normalize_ip_requires_literal_address() {
        assert_eq!(normalize_ip("203.0.113.5").unwrap(), "203.0.113.5");
        assert_eq!(normalize_ip(" 2001:db8::1 ").unwrap(), "2001:db8::1");
        assert!(normalize_ip("edge.example.com").is_err());
        assert!(normalize_ip("").is_err());
    }

    #[test]
    fn normalize_hostname_lowercases_and_rejects_whitespace() {
        let limits = limits();
        assert_eq!(
            normalize_hostname("Edge.Example.COM", &limits).unwrap(),
            "edge.example.com"
        );
        assert!(normalize_hostname("bad host", &limits).is_err());
        assert!(normalize_hostname("", &limits).is_err());
    }

    #[test]
    fn normalize_tags_dedupes_case_insensitively() {
        let limits = limits();
        let tags = normalize_tags(Some(vec!["Edge".into(), "edge".into(), "eu".into()]), &limits)
            .unwrap();
        assert_eq!(tags, vec!["edge".to_string(), "eu".to_string()]);
    }

    #[test]
    fn validate_port_rejects_zero() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn validate_config_document_requires_object() {
        assert!(validate_config_document(&json!({"a": 1})).is_ok());
        assert!(validate_config_document(&json!([1, 2])).is_err());
        assert!(validate_config_document(&json!("text")).is_err());
    }
}
