//! Store backends for webcache
//!
//! [`LocalStore`] keeps buckets as directories on disk. It is what the CLI
//! syncs into and what the end-to-end tests run against.

pub mod local;

pub use local::LocalStore;
