pub mod error;
pub mod value;

pub use error::{MapperError, NullRule, Result};
pub use value::Value;
