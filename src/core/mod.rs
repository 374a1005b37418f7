pub mod executor;

pub use executor::{Job, LoadExecutor};
