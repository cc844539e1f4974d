//! Core identifier types and error handling shared by the shopgate crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ActivityId, IssuedTokenId, ParseIdError, UserId};
