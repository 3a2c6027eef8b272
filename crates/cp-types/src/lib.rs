pub mod dataset;
pub mod evaluation;
pub mod errors;

pub use dataset::*;
pub use evaluation::*;
pub use errors::*;
