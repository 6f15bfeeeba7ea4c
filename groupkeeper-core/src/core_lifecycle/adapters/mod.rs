//! In-process implementations of the external collaborators

pub mod in_memory_catalog;
pub mod mock_engine;

pub use in_memory_catalog::InMemoryCatalog;
pub use mock_engine::{EngineCall, MockGroupKeyEngine};
