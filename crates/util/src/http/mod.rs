pub mod encoding;
pub mod parser;
pub mod path;

pub use encoding::*;
pub use parser::*;
pub use path::*;
