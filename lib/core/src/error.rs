//! Error handling foundation for shopgate.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums and lifts lower-layer failures into them with `map_err(..)?`.

use rootcause::Report;

/// Result alias carrying a rootcause [`Report`].
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
