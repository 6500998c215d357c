//! Request payload validation.
//!
//! - **Payloads**: JSON bodies and multipart forms parsed into one [`Payload`]
//!   type, with [`FieldValue`] as the borrowed view rules operate on
//! - **Rules**: string, format, pattern and file checks, each carrying the
//!   message a client sees when it fails
//! - **Schemas**: ordered fields with ordered rules; the first violation wins
//! - **Layer**: [`ValidateLayer`] buffers and checks the body before the
//!   handler runs, and ends the request with a 400 on failure
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use folio_core::validation::{non_empty, Email, FieldValidator, Schema, ValidateLayer};
//!
//! let signup = Schema::new()
//!     .field(FieldValidator::new("username").rule(non_empty("Username should be not empty")))
//!     .field(FieldValidator::new("email").rule(Email::new("Invalid email")));
//!
//! let app = Router::new()
//!     .route("/signup", post(signup_handler))
//!     .route_layer(ValidateLayer::new(signup));
//!
//! async fn signup_handler(payload: Payload) -> Result<Json<Token>> {
//!     let input: SignupInput = payload.into_json()?;
//!     // ...
//! }
//! ```

pub mod error;
pub mod layer;
pub mod rules;
pub mod validator;
pub mod value;

pub use error::{FieldError, ValidationError, ValidationErrorKind, ValidationResult};
pub use layer::{parse_payload, ValidateLayer, ValidateService, DEFAULT_BODY_LIMIT};
pub use rules::{
    format_binary_size, non_empty, Email, EmptyOr, ImageFile, IsFile, IsObject, IsString,
    MaxFileSize, MinLength, NonEmptyFile, Pattern, Url, ValidationRule,
};
pub use validator::{FieldValidator, Schema};
pub use value::{FieldValue, FormData, FormField, Payload, UploadedFile};
