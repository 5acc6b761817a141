#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod compressor;
pub mod config;
pub mod encoder;
pub mod header;
pub mod hwe;
pub mod import;
pub mod index;
pub mod iterator;
pub mod reader;
pub mod source;
pub mod types;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod shared {
    pub use super::shared_files as files;
}

#[path = "../output/mod.rs"]
pub mod output;

#[path = "../compute/mod.rs"]
pub mod compute;
