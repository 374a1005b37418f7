pub mod client;
pub mod server;

pub use client::Client;
pub use server::{Server, MAX_PARALLEL_READS};
