//! Concrete `Persistence` implementations for the server shell.

pub mod json_store;
pub mod memory;

pub use json_store::FileModelStore;
pub use memory::MemoryModelStore;
