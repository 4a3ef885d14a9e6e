//! Book lending lifecycle.
//!
//! This crate contains the state machine of a lendable book (available, on
//! hold, checked out), implemented purely as deterministic domain logic (no
//! IO, no clock reads, no storage).

pub mod book;
pub mod state;

pub use book::Book;
pub use state::{BookState, StateName};
