//! Error handling foundation for bazaar.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums and lifts them into a rootcause [`Report`] as they cross a layer.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
