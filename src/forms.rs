use std::collections::HashMap;

use crate::error::FieldErrors;
use crate::limits::MAX_FIELD_LEN;

/// Submitted form values plus the errors found while checking them.
#[derive(Debug, Clone, Default)]
pub struct Form {
    values: HashMap<String, String>,
    errors: FieldErrors,
}

impl Form {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            errors: FieldErrors::new(),
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    /// True when the field holds something other than whitespace.
    pub fn has(&self, field: &str) -> bool {
        !self.get(field).trim().is_empty()
    }

    pub fn required(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            if !self.has(field) {
                self.errors.add(field, "This field cannot be blank");
            }
        }
        self
    }

    pub fn min_length(&mut self, field: &str, len: usize) -> &mut Self {
        if self.get(field).trim().chars().count() < len {
            self.errors
                .add(field, format!("This field must be at least {len} characters long"));
        }
        self
    }

    pub fn max_length(&mut self, fields: &[&str], len: usize) -> &mut Self {
        for field in fields {
            if self.get(field).chars().count() > len {
                self.errors
                    .add(field, format!("This field must be at most {len} characters long"));
            }
        }
        self
    }

    pub fn is_email(&mut self, field: &str) -> &mut Self {
        if !is_valid_email(self.get(field).trim()) {
            self.errors.add(field, "Invalid email address");
        }
        self
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Structural address check: one `@`, non-empty local part, dotted domain of
/// non-empty labels, no whitespace.
pub fn is_valid_email(addr: &str) -> bool {
    if addr.len() > MAX_FIELD_LEN || addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}
