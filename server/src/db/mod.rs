//! Database module for PostgreSQL persistence.

mod datasets;
mod pool;
mod records;

pub use datasets::*;
pub use pool::*;
pub use records::*;
