//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.chars().count() < 6 {
        return Err("Password must be at least 6 characters long".to_string());
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    if password.trim().is_empty() {
        return Err("Password cannot be only whitespace".to_string());
    }

    Ok(())
}

/// Validate an optional display name
pub fn validate_display_name(name: Option<&str>) -> Result<(), String> {
    let Some(name) = name else {
        return Ok(());
    };

    if name.trim().is_empty() {
        return Err("Display name cannot be blank".to_string());
    }

    if name.chars().count() > 64 {
        return Err("Display name must be at most 64 characters long".to_string());
    }

    if name.chars().any(char::is_control) {
        return Err("Display name cannot contain control characters".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ann@example.com").is_ok());
        assert!(validate_email("ann.lee+desk@mail.example.org").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("ann@").is_err());
        assert!(validate_email("ann example.com").is_err());
        assert!(validate_email(&format!("{}@example.com", "a".repeat(250))).is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password("      ").is_err());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name(None).is_ok());
        assert!(validate_display_name(Some("Ann Lee")).is_ok());
        assert!(validate_display_name(Some("   ")).is_err());
        assert!(validate_display_name(Some("bad\nname")).is_err());
        assert!(validate_display_name(Some(&"n".repeat(65))).is_err());
    }
}
