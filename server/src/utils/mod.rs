pub mod error;
pub mod response;

pub use error::AppError;

/// Header carrying the client-chosen key that makes booking creation
/// idempotent.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
