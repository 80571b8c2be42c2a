//! Storage seams for the search index and watermarks.

pub mod error;
pub mod index;
pub mod watermark;

pub use error::IndexError;
pub use index::{IndexRecord, IndexStore, SqliteIndexStore};
pub use watermark::{SqliteWatermarkStore, WatermarkStore};
