//! Mail API access: wire types, errors and the HTTP client.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiSession, HttpMailApi, HttpMailApiOptions, MailApi, LOW_PRIORITY};
pub use error::ApiError;
pub use types::{DetailPayload, ListQuery, MessageDetail, MessageStub, Recipient};
