//! Column value model.
//!
//! Every per-type concern (width, raw encoding, comparison) is an exhaustive
//! match over [`DataType`] or [`Value`], so adding a value kind is a compile
//! error everywhere it is not yet handled.

pub mod bitmap;
pub mod value;
pub mod vector;

pub use bitmap::Bitmap;
pub use value::{DataType, Value};
pub use vector::ColumnVector;
