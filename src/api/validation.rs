//! Input validation for API requests.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Deliberately loose: one @, no whitespace, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();

    /// Regex for validating school slugs (lowercase alphanumeric with single dashes)
    static ref SLUG_REGEX: Regex = Regex::new(
        r"^[a-z0-9]+(-[a-z0-9]+)*$"
    ).unwrap();

    /// Regex for validating email domains
    static ref DOMAIN_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$"
    ).unwrap();

    /// Usernames follow the slug shape produced for placeholder accounts
    static ref USERNAME_REGEX: Regex = Regex::new(
        r"^[a-z0-9]+([-_.][a-z0-9]+)*$"
    ).unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_REASON_LEN: usize = 10;
pub const MAX_REASON_LEN: usize = 2000;
pub const MAX_QUANTITY: i64 = 999;

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.trim().is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email.trim()) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > 256 {
        return Err("Password is too long (max 256 characters)".to_string());
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str, label: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", label));
    }
    if trimmed.chars().count() > 200 {
        return Err(format!("{} is too long (max 200 characters)", label));
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.len() < 2 {
        return Err("Slug is too short (min 2 characters)".to_string());
    }
    if slug.len() > 100 {
        return Err("Slug is too long (max 100 characters)".to_string());
    }
    if !SLUG_REGEX.is_match(slug) {
        return Err("Slug must be lowercase alphanumeric with single dashes".to_string());
    }
    Ok(())
}

pub fn validate_email_domain(domain: &str) -> Result<(), String> {
    if domain.len() > 253 {
        return Err("Domain name is too long (max 253 characters)".to_string());
    }
    if !DOMAIN_REGEX.is_match(domain) {
        return Err("Invalid email domain".to_string());
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() || username.len() > 64 {
        return Err("Username must be 1-64 characters".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err("Username must be lowercase letters and digits separated by '-', '_' or '.'".to_string());
    }
    Ok(())
}

pub fn validate_quantity(quantity: i64) -> Result<(), String> {
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(format!("Quantity must be between 1 and {}", MAX_QUANTITY));
    }
    Ok(())
}

pub fn validate_reason(reason: &str) -> Result<(), String> {
    let len = reason.trim().chars().count();
    if len < MIN_REASON_LEN {
        return Err(format!(
            "Reason must be at least {} characters",
            MIN_REASON_LEN
        ));
    }
    if len > MAX_REASON_LEN {
        return Err(format!("Reason is too long (max {} characters)", MAX_REASON_LEN));
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }
    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }
    Ok(())
}

/// Normalize an ISBN to its bare digits (plus a trailing `X` for ISBN-10)
/// and verify the checksum.
pub fn normalize_isbn(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match cleaned.len() {
        10 => {
            let (body, check) = cleaned.split_at(9);
            if !body.chars().all(|c| c.is_ascii_digit())
                || !(check == "X" || check.chars().all(|c| c.is_ascii_digit()))
            {
                return Err(format!("Invalid ISBN: {}", raw));
            }
            let sum: u32 = cleaned
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    let v = if c == 'X' { 10 } else { c.to_digit(10).unwrap_or(0) };
                    v * (10 - i as u32)
                })
                .sum();
            if sum % 11 != 0 {
                return Err(format!("Invalid ISBN checksum: {}", raw));
            }
        }
        13 => {
            if !cleaned.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("Invalid ISBN: {}", raw));
            }
            let sum: u32 = cleaned
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    let v = c.to_digit(10).unwrap_or(0);
                    if i % 2 == 0 {
                        v
                    } else {
                        v * 3
                    }
                })
                .sum();
            if sum % 10 != 0 {
                return Err(format!("Invalid ISBN checksum: {}", raw));
            }
        }
        _ => return Err(format!("ISBN must have 10 or 13 digits: {}", raw)),
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("teacher@school.edu").is_ok());
        assert!(validate_email(" parent+kids@mail.example.com ").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@@signs.com").is_err());
        assert!(validate_email("space in@name.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("bookworm1").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("noDigitsHere").is_err());
        assert!(validate_password("1234567890").is_err());
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("lincoln-elementary").is_ok());
        assert!(validate_slug("ps118").is_ok());

        assert!(validate_slug("a").is_err());
        assert!(validate_slug("-lead").is_err());
        assert!(validate_slug("double--dash").is_err());
        assert!(validate_slug("Upper").is_err());
    }

    #[test]
    fn test_validate_email_domain() {
        assert!(validate_email_domain("lincoln.k12.us").is_ok());
        assert!(validate_email_domain("localhost").is_err());
        assert!(validate_email_domain("-bad.org").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(30).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-2).is_err());
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert!(validate_reason("Too graphic for third graders.").is_ok());
        assert!(validate_reason("   short   ").is_err());
        assert!(validate_reason(&"x".repeat(MAX_REASON_LEN + 1)).is_err());
    }

    #[test]
    fn test_normalize_isbn13() {
        assert_eq!(normalize_isbn("978-0-306-40615-7").unwrap(), "9780306406157");
        assert_eq!(normalize_isbn("9780306406157").unwrap(), "9780306406157");
        assert!(normalize_isbn("9780306406158").is_err());
    }

    #[test]
    fn test_normalize_isbn10() {
        assert_eq!(normalize_isbn("0-306-40615-2").unwrap(), "0306406152");
        assert_eq!(normalize_isbn("080442957x").unwrap(), "080442957X");
        assert!(normalize_isbn("0306406153").is_err());
        assert!(normalize_isbn("12345").is_err());
        assert!(normalize_isbn("03064X6152").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "book_id").is_ok());
        assert!(validate_uuid("", "book_id").is_err());
        assert!(validate_uuid("not-a-uuid", "book_id").is_err());
    }
}
