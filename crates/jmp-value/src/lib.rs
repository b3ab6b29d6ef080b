//! Self-describing dynamic value used to transport driver call arguments and results.
//!
//! [`Value`] is compatible with the JSON data model (null/bool/number/string/list/map) so it can
//! be carried as JSON text in stream metadata and logged without a schema. [`encode`]/[`decode`]
//! convert between it and native Rust types; [`Number`] keeps 64-bit integers exact even when
//! the receiving end has to round-trip the value through an IEEE-754 `f64`.

mod convert;
mod number;
mod value;

pub use self::convert::{decode, encode, DecodeError, EncodeError};
pub use self::number::Number;
pub use self::value::Value;
