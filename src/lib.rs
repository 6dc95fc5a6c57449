// ABOUTME: Public library API for cfsync
// ABOUTME: Re-exports core modules for external use

pub mod api;
pub mod auth;
pub mod callback;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod paginate;
pub mod storage;
pub mod sync;
pub mod token_store;
pub mod util;

pub use error::{Error, Result};
pub use model::{Credential, IndexEntry, ItemSummary, PageDetail, PageSummary, Space, SyncIndex};
