#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod query;
pub mod service;
pub mod stats;
pub mod storage;

pub use error::{IndexError, Result};
pub use service::IndexService;
