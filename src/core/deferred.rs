// src/core/deferred.rs

//! The deferred-work handle: a host capability that keeps caller-submitted
//! work alive past the originating request.
//!
//! Every function that may want to outlive its caller accepts the handle
//! explicitly as an `Option`; when it is absent, "background" code paths run
//! inline.

use futures::future::BoxFuture;

/// A capability for dispatching work that must survive the current request.
pub trait DeferredWork: Send + Sync {
    /// Submits a task to run in the background. The implementation keeps the
    /// future alive until completion; the task itself must swallow errors.
    fn defer(&self, task: BoxFuture<'static, ()>);
}

/// The production handle: detaches work onto the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDeferred;

impl DeferredWork for TokioDeferred {
    fn defer(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}
