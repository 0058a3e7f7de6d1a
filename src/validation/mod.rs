//! Request body validation using the `validator` crate.
//!
//! Rule failures become `validation_error` responses listing each field.

mod extractor;

pub use extractor::{ValidatedJson, validate_json};
pub use validator;
