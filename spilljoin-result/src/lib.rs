//! Error types and result definitions for the spilljoin workspace.
//!
//! Every crate in the workspace returns [`Result<T>`], whose error variant is the single
//! [`Error`] enum defined here. Errors propagate with the `?` operator; nothing in the join
//! engine retries a failed operation.
//!
//! # Error Categories
//!
//! - **Configuration errors** ([`Error::InvalidArgumentError`]): unknown columns, mismatched
//!   join clauses, illegal row key policies. Raised before any row is read.
//! - **I/O errors** ([`Error::Io`]): spill file creation, writes and reads.
//! - **Data format errors** ([`Error::Arrow`]): encoding or decoding spilled rows.
//! - **Cancellation** ([`Error::Canceled`]): the caller asked the join to stop.
//! - **Internal errors** ([`Error::Internal`]): violated invariants.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
