//! Foundational and often-reused types.

pub mod address;
pub mod candidates;
pub mod cost_table;
pub mod error;
pub mod id;
pub mod message;
pub mod traits;
