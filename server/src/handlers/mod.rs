//! Request handlers for reservation operations.

mod catalog;
mod reservations;

pub use catalog::*;
pub use reservations::*;
