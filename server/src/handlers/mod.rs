//! Request handlers for dataset and record operations.

mod datasets;
mod records;

pub use datasets::*;
pub use records::*;
