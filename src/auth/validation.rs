use regex::Regex;
use std::sync::LazyLock;

use super::error::ValidationError;

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

/// Returns the trimmed address when it looks like `local@domain.tld`.
pub fn validate_email(email: &str) -> Result<&str, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email)
}

pub fn validate_credentials<'a>(
    email: &'a str,
    password: &str,
) -> Result<&'a str, ValidationError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    validate_email(email)
}

pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword);
    }
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}
