//! Types library for the card forecaster marketplace pipeline
//!
//! This library provides the core domain value types shared across the
//! forecaster's services, ensuring type safety and deterministic behavior.
//!
//! # Modules
//! - `ids`: Unique identifiers (CardExternalId)
//! - `season`: Validated season year
//! - `numeric`: Non-negative integer marketplace prices (NaturalNumber)

// Public modules
pub mod ids;
pub mod numeric;
pub mod season;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::season::*;
}
