#![doc = include_str!("../README.md")]

mod error;
mod pool;
mod queue;
mod task;
mod worker;

pub use crate::{
    error::ShutdownError,
    pool::{Builder, PerCore, PoolSize, Spawner, ThreadPool},
};

/// Get a builder for creating a customized thread pool.
///
/// A shorthand for [`ThreadPool::builder`].
#[inline]
pub fn builder() -> Builder {
    Builder::default()
}
