pub mod json;
pub use json::{parse_stringified_json, unwrap_stringified_json};
pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_backend_url, validate_live_url};
