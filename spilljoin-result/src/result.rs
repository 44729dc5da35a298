use crate::error::Error;

/// Result type alias used throughout spilljoin.
///
/// This is a type alias for `std::result::Result<T, Error>`, providing a convenient
/// shorthand for functions that return spilljoin errors.
pub type Result<T> = std::result::Result<T, Error>;
