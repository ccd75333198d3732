//! Interception hooks.
//!
//! A hook is registered for one [`Phase`] of the pipeline and receives the
//! live [`Transaction`]: its request, its response and its data store. Hooks
//! come in two kinds, fixed at registration time:
//!
//! - [`Hook::sync`]: done as soon as the closure returns.
//! - [`Hook::future`] / [`Hook::deferred`]: the pipeline suspends until the
//!   returned future resolves, or until the [`Next`] continuation is
//!   signalled. Other transactions keep running in the meantime.

mod invoker;

pub(crate) use invoker::invoke;

use crate::pipeline::Transaction;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

pub type HookResult = anyhow::Result<()>;

type SyncHookFn = dyn Fn(&mut Transaction) -> HookResult + Send + Sync;
type AsyncHookFn = dyn for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, HookResult> + Send + Sync;

/// Interception points, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before anything is sent to the origin.
    Request,
    /// After the request body has been transmitted.
    RequestSent,
    /// After the response is known, before it is sent to the client.
    Response,
    /// After the response body has been transmitted.
    ResponseSent,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Request,
        Phase::RequestSent,
        Phase::Response,
        Phase::ResponseSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::RequestSent => "request_sent",
            Phase::Response => "response",
            Phase::ResponseSent => "response_sent",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-supplied interception function.
#[derive(Clone)]
pub enum Hook {
    Sync(Arc<SyncHookFn>),
    Async(Arc<AsyncHookFn>),
}

impl Hook {
    /// A hook that completes when it returns.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Transaction) -> HookResult + Send + Sync + 'static,
    {
        Hook::Sync(Arc::new(f))
    }

    /// A hook that completes when its future resolves.
    ///
    /// ```ignore
    /// Hook::future(|tx| Box::pin(async move {
    ///     tokio::time::sleep(Duration::from_millis(5)).await;
    ///     tx.request.set_uri(Uri::from_static("/"));
    ///     Ok(())
    /// }))
    /// ```
    pub fn future<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, HookResult> + Send + Sync + 'static,
    {
        Hook::Async(Arc::new(f))
    }

    /// A continuation-style hook.
    ///
    /// The closure runs synchronously with access to the transaction and is
    /// handed a [`Next`]; the pipeline resumes once `Next::done` or
    /// `Next::fail` is called, from any task. Dropping `Next` without
    /// signalling fails the hook.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&mut Transaction, Next) -> HookResult + Send + Sync + 'static,
    {
        Hook::future(move |tx| {
            let (next, signalled) = Next::channel();
            let started = f(tx, next);
            Box::pin(async move {
                started?;
                match signalled.await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "continuation dropped without being signalled"
                    )),
                }
            })
        })
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Hook::Async(_))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Sync(_) => f.write_str("Hook::Sync"),
            Hook::Async(_) => f.write_str("Hook::Async"),
        }
    }
}

/// Completion signal handed to deferred hooks.
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<HookResult>,
}

impl Next {
    fn channel() -> (Self, oneshot::Receiver<HookResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resume the pipeline.
    pub fn done(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Fail the transaction with `err`.
    pub fn fail(self, err: impl Into<anyhow::Error>) {
        let _ = self.tx.send(Err(err.into()));
    }
}

/// Hook registration: at most one hook per phase.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    request: Option<Hook>,
    request_sent: Option<Hook>,
    response: Option<Hook>,
    response_sent: Option<Hook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `phase`, replacing any previous one.
    pub fn on(mut self, phase: Phase, hook: Hook) -> Self {
        *self.slot_mut(phase) = Some(hook);
        self
    }

    pub fn set(&mut self, phase: Phase, hook: Hook) {
        *self.slot_mut(phase) = Some(hook);
    }

    pub fn remove(&mut self, phase: Phase) -> Option<Hook> {
        self.slot_mut(phase).take()
    }

    pub fn get(&self, phase: Phase) -> Option<&Hook> {
        match phase {
            Phase::Request => self.request.as_ref(),
            Phase::RequestSent => self.request_sent.as_ref(),
            Phase::Response => self.response.as_ref(),
            Phase::ResponseSent => self.response_sent.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        Phase::ALL.iter().filter(|p| self.get(**p).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<Hook> {
        match phase {
            Phase::Request => &mut self.request,
            Phase::RequestSent => &mut self.request_sent,
            Phase::Response => &mut self.response,
            Phase::ResponseSent => &mut self.response_sent,
        }
    }
}
