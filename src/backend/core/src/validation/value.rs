//! Parsed request payloads and the field values rules look at.

use axum::body::Bytes;
use serde_json::Value;

/// A file part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// One multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text(String),
    File(UploadedFile),
}

/// Multipart parts in arrival order. The first part wins for repeated names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    parts: Vec<(String, FormField)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, field: FormField) {
        self.parts.push((name.into(), field));
    }

    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.push(name, FormField::Text(value.to_string()));
        self
    }

    pub fn with_file(mut self, name: &str, file: UploadedFile) -> Self {
        self.push(name, FormField::File(file));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.parts.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FormField::Text(s) => Some(s.as_str()),
            FormField::File(_) => None,
        }
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        match self.get(name)? {
            FormField::File(f) => Some(f),
            FormField::Text(_) => None,
        }
    }
}

/// A request body after content-type dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Form(FormData),
}

impl Payload {
    /// Look up a field. Dotted paths (`repo.url`) descend into JSON objects.
    pub fn field(&self, path: &str) -> FieldValue<'_> {
        match self {
            Self::Json(root) => path
                .split('.')
                .try_fold(root, |value, key| value.as_object()?.get(key))
                .map_or(FieldValue::Missing, FieldValue::Json),
            Self::Form(form) => match form.get(path) {
                Some(FormField::Text(s)) => FieldValue::Text(s.as_str()),
                Some(FormField::File(f)) => FieldValue::File(f),
                None => FieldValue::Missing,
            },
        }
    }
}

/// A borrowed view of one field, whatever the body encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Missing,
    Json(&'a Value),
    Text(&'a str),
    File(&'a UploadedFile),
}

impl<'a> FieldValue<'a> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing | Self::Json(Value::Null))
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Self::Text(s) => Some(s),
            Self::Json(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&'a UploadedFile> {
        match *self {
            Self::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Json(Value::Object(_)))
    }

    /// Type name used in type-mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Missing => "undefined",
            Self::Text(_) => "string",
            Self::File(_) => "File",
            Self::Json(value) => match value {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "Array",
                Value::Object(_) => "Object",
            },
        }
    }
}
