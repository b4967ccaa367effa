//! Runtime adapters: the `Spawn` abstraction and the Tokio implementation.

use std::future::Future;

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

#[cfg(feature = "tokio-runtime")]
mod tokio_spawner;
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;
