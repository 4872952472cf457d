//! Foundation layer: data model and error types.

pub mod error;
pub mod event;
pub mod message;
pub mod types;
