//! Recipient records and the paginated store the dispatch engine reads from
//! and writes delivery outcomes back to.

pub mod record;
pub mod store;

pub use record::{DispatchResult, DispatchStatus, Recipient, RecipientId, RecipientPatch};
pub use store::{InMemoryRecipientStore, RecipientPage, RecipientStore, StoreError};
