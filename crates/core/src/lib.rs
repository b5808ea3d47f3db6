//! Domain types and pure logic shared by every Smart Create crate.
//!
//! Nothing in here performs I/O: persistence lives in `smartcreate-db`,
//! byte storage in `smartcreate-store`, and the render-server client in
//! `smartcreate-render`.

pub mod error;
pub mod hashing;
pub mod seed;
pub mod size;
pub mod task;
pub mod types;
