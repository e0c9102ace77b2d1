//! Storage engine internals
//!
//! - [`sector`] - 520-byte sector blocks and payload splitting
//! - [`io`] - positional storage media (disk and memory)
//! - [`store`] - sector chain allocation over the data container and location indexes
//! - [`reference_table`] - per-category catalogs of file metadata
//! - [`table_cache`] - decoded catalog cache
//! - [`compression`] - container codecs
//! - [`codec`] - cache file containers and entry packing
//! - [`metadata`] - file metadata and logical files
//! - [`config`] - cache configuration
//! - [`error`] - error types

pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod io;
pub mod metadata;
pub mod reference_table;
pub mod sector;
pub mod store;
pub mod table_cache;
