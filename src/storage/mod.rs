//! Storage backends for coursecraft

pub mod facts;
mod sqlite;

pub use facts::LanceFactIndex;
pub use sqlite::CurriculumStore;
