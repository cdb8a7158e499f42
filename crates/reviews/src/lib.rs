//! Write path: validate, persist and announce dish reviews.

pub mod writer;

pub use writer::ReviewWriter;
