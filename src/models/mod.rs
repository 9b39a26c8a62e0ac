//! Domain models shared across the engine

pub mod dependency;
pub mod finding;
pub mod schema;

pub use dependency::*;
pub use finding::*;
pub use schema::*;
