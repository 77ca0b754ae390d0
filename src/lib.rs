//! Feed synchronization pipeline and its SQLite-backed content store.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
