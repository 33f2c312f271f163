//! Small shared helpers.

pub mod coding;
