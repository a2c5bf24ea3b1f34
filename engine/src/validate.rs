//! Naming rules for datasets and record keys.
//!
//! Names are validated before anything touches the local store, so a
//! rejected name never leaves a row behind.

use crate::{error::Result, Error};

/// Maximum length of a dataset name.
pub const MAX_DATASET_NAME_LEN: usize = 128;

/// Maximum length of a record key, in bytes.
pub const MAX_RECORD_KEY_LEN: usize = 1024;

/// Validate a dataset name against `[a-zA-Z0-9_.:-]+`.
pub fn validate_dataset_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("dataset name is empty".into()));
    }
    if name.len() > MAX_DATASET_NAME_LEN {
        return Err(Error::Validation(format!(
            "dataset name exceeds {} characters",
            MAX_DATASET_NAME_LEN
        )));
    }
    if let Some(c) = name.chars().find(|c| !is_dataset_name_char(*c)) {
        return Err(Error::Validation(format!(
            "invalid character {:?} in dataset name '{}'",
            c, name
        )));
    }
    Ok(())
}

fn is_dataset_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}

/// Validate a record key.
pub fn validate_record_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("record key is empty".into()));
    }
    if key.len() > MAX_RECORD_KEY_LEN {
        return Err(Error::Validation(format!(
            "record key exceeds {} bytes",
            MAX_RECORD_KEY_LEN
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::Validation(
            "record key contains control characters".into(),
        ));
    }
    Ok(())
}
