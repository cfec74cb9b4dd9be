pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{child_address, is_covered_by, validate_address, AccountId, AccountInfo, Relation};
