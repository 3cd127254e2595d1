//! JSON-parameter sanitization for object-valued CLI flags (`jsonSchema`,
//! `agents`). Defense-in-depth: depth limit, size limit, character safety,
//! a re-scan of the encoded string's nesting depth, and a shell-metacharacter
//! denylist.

use crate::error::ExecutorError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const MAX_DEPTH: usize = 10;
const MAX_ENCODED_BYTES: usize = 10_240;
const MAX_NESTING_SCAN: usize = 20;

static DENYLIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\$\(").unwrap(),
        Regex::new(r"`").unwrap(),
        Regex::new(r"&&").unwrap(),
        Regex::new(r"\|\|").unwrap(),
        Regex::new(r";\w").unwrap(),
        Regex::new(r">&").unwrap(),
        Regex::new(r"\|\w").unwrap(),
        Regex::new(r"<\(").unwrap(),
    ]
});

/// Validate and encode a JSON value destined for an object-valued CLI flag.
///
/// `param` names the flag, for error reporting only.
pub fn sanitize_json_param(param: &str, value: &Value) -> Result<String, ExecutorError> {
    check_depth(param, value, 0)?;

    let encoded = serde_json::to_string(value).map_err(|e| ExecutorError::InvalidArgument {
        param: param.to_string(),
        reason: format!("failed to encode JSON: {e}"),
    })?;

    if encoded.len() > MAX_ENCODED_BYTES {
        return Err(ExecutorError::InvalidArgument {
            param: param.to_string(),
            reason: format!("encoded size {} exceeds {MAX_ENCODED_BYTES} bytes", encoded.len()),
        });
    }

    check_character_safety(param, &encoded)?;
    check_nesting_scan(param, &encoded)?;
    check_shell_metacharacters(param, &encoded)?;

    Ok(encoded)
}

fn check_depth(param: &str, value: &Value, depth: usize) -> Result<(), ExecutorError> {
    if depth > MAX_DEPTH {
        return Err(ExecutorError::InvalidArgument {
            param: param.to_string(),
            reason: format!("value tree depth exceeds {MAX_DEPTH}"),
        });
    }
    match value {
        Value::Object(map) => {
            for v in map.values() {
                check_depth(param, v, depth + 1)?;
            }
        }
        Value::Array(items) => {
            for v in items {
                check_depth(param, v, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_character_safety(param: &str, encoded: &str) -> Result<(), ExecutorError> {
    // `serde_json::to_string` already escapes \t \n \r and control chars as
    // \uXXXX, so a raw NUL or C0 control surviving into the encoded string
    // indicates the encoder itself was bypassed (e.g. a pre-escaped raw
    // string slipped through) — reject defensively.
    if encoded.chars().any(|c| c == '\0' || (c.is_control() && c != '\t' && c != '\n' && c != '\r')) {
        return Err(ExecutorError::InvalidArgument {
            param: param.to_string(),
            reason: "contains raw control characters".to_string(),
        });
    }
    Ok(())
}

fn check_nesting_scan(param: &str, encoded: &str) -> Result<(), ExecutorError> {
    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    for c in encoded.chars() {
        match c {
            '{' | '[' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    if max_depth > MAX_NESTING_SCAN as i64 {
        return Err(ExecutorError::InvalidArgument {
            param: param.to_string(),
            reason: format!("encoded nesting depth exceeds {MAX_NESTING_SCAN}"),
        });
    }
    Ok(())
}

fn check_shell_metacharacters(param: &str, encoded: &str) -> Result<(), ExecutorError> {
    for pattern in DENYLIST_PATTERNS.iter() {
        if pattern.is_match(encoded) {
            return Err(ExecutorError::InvalidArgument {
                param: param.to_string(),
                reason: "contains shell metacharacters".to_string(),
            });
        }
    }
    Ok(())
}
