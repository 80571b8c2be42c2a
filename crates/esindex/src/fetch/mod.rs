//! Network operations of the indexing pipeline.

pub mod detail;
pub mod page;

pub use detail::{DetailFetchFailed, DetailResult, MessageDetailFetchOperation};
pub use page::{PageResult, PagedFetchOperation, DEFAULT_PAGE_SIZE};
