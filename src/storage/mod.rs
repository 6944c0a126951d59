//! Record store contract and the in-memory backend.

pub mod traits;
pub mod memory;
