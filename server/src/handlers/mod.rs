//! Request handlers for sync operations.

mod lww;
mod validate;

pub use lww::*;
pub use validate::*;
