//! Input validation shared by the booking, chat and account flows.
//!
//! Validators return `Result<(), String>` (or the parsed value) so that
//! callers can collect every failing field into a [`FieldErrors`] map
//! instead of stopping at the first problem.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{DATE_FORMAT, TIME_FORMAT};

/// Longest chat message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub const MIN_CALENDAR_YEAR: i32 = 1970;
pub const MAX_CALENDAR_YEAR: i32 = 2100;

lazy_static! {
    /// Regex for email addresses: local part, @, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
    ).unwrap();

    /// Regex for calendar dates (YYYY-MM-DD)
    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();

    /// Regex for times of day (HH:MM, optional :SS as sent by time inputs)
    static ref TIME_REGEX: Regex = Regex::new(r"^([01]\d|2[0-3]):[0-5]\d(:[0-5]\d)?$").unwrap();

    /// Regex for usernames (letters, digits, dot, dash, underscore; 3-32 chars)
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
}

/// Field name to messages, ordered by field for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `validate_*` result, if any.
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.errors
    }

    /// Ok when nothing was recorded.
    pub fn finish(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

/// Trimmed value, or None when absent or blank.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` date. Shape errors and impossible dates
/// (e.g. `2025-02-30`) are both reported as a format problem.
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    if !DATE_REGEX.is_match(value) {
        return Err("Invalid date format. Use YYYY-MM-DD".to_string());
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| "Invalid calendar date".to_string())
}

/// Parse an `HH:MM` or `HH:MM:SS` time of day.
pub fn parse_time(value: &str) -> Result<NaiveTime, String> {
    if !TIME_REGEX.is_match(value) {
        return Err("Invalid time format. Use HH:MM".to_string());
    }
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| "Invalid time format. Use HH:MM".to_string())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-32 letters, digits, dots, dashes or underscores".to_string(),
        );
    }
    Ok(())
}

pub fn validate_password(password: &str, min_length: usize) -> Result<(), String> {
    if password.chars().count() < min_length {
        return Err(format!("Password must be at least {} characters", min_length));
    }
    Ok(())
}

pub fn validate_message_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("Message cannot be empty".to_string());
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(format!(
            "Message is too long (max {} characters)",
            MAX_MESSAGE_CHARS
        ));
    }
    Ok(())
}
