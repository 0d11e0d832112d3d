//! Shared range-validation helpers used by all domain validators.

/// Push an error if `value` is outside `[min, max]`.
pub(crate) fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

/// Push an error if `value` is empty or contains anything but
/// `[A-Za-z0-9_]`, which keeps table names safe to splice into URLs.
pub(crate) fn validate_identifier(errors: &mut Vec<String>, name: &str, value: &str) {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        errors.push(format!("{name} = {value:?} is not a valid identifier"));
    }
}
