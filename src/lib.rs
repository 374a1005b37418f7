#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod event;
pub mod lazy;
pub mod model;
pub mod pool;
pub mod session;
pub mod stats;
pub mod storage;
pub mod stream;
