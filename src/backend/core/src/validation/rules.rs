//! Field rules.
//!
//! Every rule carries the message a client sees when it fails. String rules
//! reject non-string values with a type-mismatch message of their own, so a
//! field whose value has the wrong type fails on its first rule.

use crate::validation::error::{FieldError, ValidationError, ValidationErrorKind};
use crate::validation::value::FieldValue;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════════
// Pre-compiled Regex Patterns
// ═══════════════════════════════════════════════════════════════════════════════

/// Email validation regex (RFC 5322 simplified).
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    ).expect("Invalid email regex")
});

/// Absolute URL with a scheme.
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+[^\s]*$").expect("Invalid URL regex")
});

type Message = Cow<'static, str>;

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Rule Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A check applied to one field.
pub trait ValidationRule: Send + Sync {
    /// Validate the value and return the error, if any.
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError>;

    /// Get a description of this rule.
    fn description(&self) -> String;
}

fn type_error(expected: &str, value: &FieldValue<'_>) -> FieldError {
    let received = value.type_name();
    FieldError::new(
        ValidationErrorKind::InvalidType {
            expected: expected.to_string(),
            received: received.to_string(),
        },
        format!("Invalid type: Expected {} but received {}", expected, received),
    )
}

fn expect_str<'a>(value: &FieldValue<'a>) -> Result<&'a str, FieldError> {
    value.as_str().ok_or_else(|| type_error("string", value))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Type Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Value must be a string.
#[derive(Debug, Clone, Default)]
pub struct IsString;

impl ValidationRule for IsString {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        expect_str(value).err()
    }

    fn description(&self) -> String {
        "string".to_string()
    }
}

/// Value must be a JSON object.
#[derive(Debug, Clone, Default)]
pub struct IsObject;

impl ValidationRule for IsObject {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        (!value.is_object()).then(|| type_error("Object", value))
    }

    fn description(&self) -> String {
        "object".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// String Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// String of at least `min` characters.
#[derive(Debug, Clone)]
pub struct MinLength {
    min: usize,
    message: Message,
}

impl MinLength {
    pub fn new(min: usize, message: impl Into<Message>) -> Self {
        Self {
            min,
            message: message.into(),
        }
    }
}

/// Shorthand for `MinLength::new(1, message)`.
pub fn non_empty(message: impl Into<Message>) -> MinLength {
    MinLength::new(1, message)
}

impl ValidationRule for MinLength {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let s = match expect_str(value) {
            Ok(s) => s,
            Err(e) => return Some(e),
        };
        let actual = s.chars().count();
        (actual < self.min).then(|| {
            FieldError::new(
                ValidationErrorKind::MinLength {
                    min: self.min,
                    actual,
                },
                self.message.clone(),
            )
        })
    }

    fn description(&self) -> String {
        format!("at least {} characters", self.min)
    }
}

/// Email address.
#[derive(Debug, Clone)]
pub struct Email {
    message: Message,
}

impl Email {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ValidationRule for Email {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let s = match expect_str(value) {
            Ok(s) => s,
            Err(e) => return Some(e),
        };
        (!EMAIL_REGEX.is_match(s))
            .then(|| FieldError::new(ValidationErrorKind::InvalidEmail, self.message.clone()))
    }

    fn description(&self) -> String {
        "valid email format".to_string()
    }
}

/// Absolute URL.
#[derive(Debug, Clone)]
pub struct Url {
    message: Message,
}

impl Url {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ValidationRule for Url {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let s = match expect_str(value) {
            Ok(s) => s,
            Err(e) => return Some(e),
        };
        (!URL_REGEX.is_match(s))
            .then(|| FieldError::new(ValidationErrorKind::InvalidUrl, self.message.clone()))
    }

    fn description(&self) -> String {
        "valid URL format".to_string()
    }
}

/// String matching a regex.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    message: Message,
}

impl Pattern {
    /// Create a new pattern rule from a regex string.
    pub fn new(pattern: &str, message: impl Into<Message>) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            message: message.into(),
        })
    }
}

impl ValidationRule for Pattern {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let s = match expect_str(value) {
            Ok(s) => s,
            Err(e) => return Some(e),
        };
        (!self.regex.is_match(s)).then(|| {
            FieldError::new(
                ValidationErrorKind::Pattern {
                    pattern: self.regex.as_str().to_string(),
                },
                self.message.clone(),
            )
        })
    }

    fn description(&self) -> String {
        format!("matches pattern: {}", self.regex.as_str())
    }
}

/// Accepts the empty string, otherwise defers to the inner rule.
#[derive(Debug, Clone)]
pub struct EmptyOr<R>(pub R);

impl<R: ValidationRule> ValidationRule for EmptyOr<R> {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        match value.as_str() {
            Some("") => None,
            _ => self.0.validate(value),
        }
    }

    fn description(&self) -> String {
        format!("empty or {}", self.0.description())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Value must be an uploaded file.
#[derive(Debug, Clone)]
pub struct IsFile {
    message: Message,
}

impl IsFile {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ValidationRule for IsFile {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        value.as_file().is_none().then(|| {
            FieldError::new(
                ValidationErrorKind::InvalidType {
                    expected: "File".to_string(),
                    received: value.type_name().to_string(),
                },
                self.message.clone(),
            )
        })
    }

    fn description(&self) -> String {
        "file".to_string()
    }
}

/// File with an `image/*` content type.
#[derive(Debug, Clone)]
pub struct ImageFile {
    message: Message,
}

impl ImageFile {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ValidationRule for ImageFile {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let file = value.as_file()?;
        (!file.content_type.starts_with("image")).then(|| {
            FieldError::new(
                ValidationErrorKind::InvalidFileType {
                    content_type: file.content_type.clone(),
                },
                self.message.clone(),
            )
        })
    }

    fn description(&self) -> String {
        "image file".to_string()
    }
}

/// File with at least one byte.
#[derive(Debug, Clone)]
pub struct NonEmptyFile {
    message: Message,
}

impl NonEmptyFile {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ValidationRule for NonEmptyFile {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let file = value.as_file()?;
        (file.size() == 0)
            .then(|| FieldError::new(ValidationErrorKind::EmptyFile, self.message.clone()))
    }

    fn description(&self) -> String {
        "non-empty file".to_string()
    }
}

/// File strictly smaller than `max` bytes.
#[derive(Debug, Clone)]
pub struct MaxFileSize {
    max: u64,
    message: Message,
}

impl MaxFileSize {
    /// Rule with the message `Max size is <size>`, e.g. `Max size is 5 MiB`.
    pub fn new(max: u64) -> Self {
        Self {
            max,
            message: Cow::Owned(format!("Max size is {}", format_binary_size(max))),
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// This rule's rejection for a file too large to be buffered at all.
    /// The actual size is unknown, so it is reported as the limit.
    pub fn exceeded(&self, field: &str) -> ValidationError {
        ValidationError::field(
            field,
            FieldError::new(
                ValidationErrorKind::FileTooLarge {
                    max: self.max,
                    actual: self.max,
                },
                self.message.clone(),
            ),
        )
    }
}

impl ValidationRule for MaxFileSize {
    fn validate(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        let file = value.as_file()?;
        (file.size() >= self.max).then(|| {
            FieldError::new(
                ValidationErrorKind::FileTooLarge {
                    max: self.max,
                    actual: file.size(),
                },
                self.message.clone(),
            )
        })
    }

    fn description(&self) -> String {
        format!("smaller than {}", format_binary_size(self.max))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Size Formatting
// ═══════════════════════════════════════════════════════════════════════════════

const BINARY_UNITS: [&str; 7] = ["B", "kiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Format a byte count with binary units and three significant digits.
///
/// `5_242_880` → `"5 MiB"`, `1536` → `"1.5 kiB"`, `100` → `"100 B"`.
pub fn format_binary_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BINARY_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let decimals = if value >= 100.0 {
        0
    } else if value >= 10.0 {
        1
    } else {
        2
    };
    let mut number = format!("{:.*}", decimals, value);
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{} {}", number, BINARY_UNITS[unit])
}
