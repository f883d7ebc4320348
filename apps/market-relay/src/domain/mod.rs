//! Domain Layer - Core market types and pure transformations.
//!
//! Nothing here performs I/O. Records, normalization rules, flash
//! semantics and candle synthesis are all deterministic functions of
//! their inputs.

/// Canonical records, upstream ticker shape and tracked instruments.
pub mod market;

/// Upstream ticker to canonical record mapping.
pub mod normalizer;

/// Subscriber entries and price-move flash markers.
pub mod flash;

/// Local OHLC candle synthesis from latest prices.
pub mod candle;
