//! Concrete node implementations

mod glob;
mod path;
mod value;

pub use self::glob::GlobNode;
pub use self::path::PathNode;
pub use self::value::ValueNode;
