//! The long-poll loop and handler registry.
//!
//! [`Dispatcher::spawn`] runs the loop as its own task:
//!
//! 1. If the session is not authenticated, report [`Notice::ReauthRequired`]
//!    and wait for it to be again (or for cancellation).
//! 2. Poll once with the current cursor. An empty batch polls again at
//!    once with the same cursor.
//! 3. Hand every fresh event, in server order, to each matching handler.
//!    A failing or panicking handler is reported and skipped.
//! 4. On a transient failure, back off and retry with the last cursor that
//!    was applied.
//!
//! Cancellation is checked before each poll and during backoff sleeps. A
//! poll already in flight always completes, so its cursor is either
//! applied or discarded as a whole.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use legy_proto::{PollCursor, ops};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::Config;
use crate::channel::Service;
use crate::errors::{HandlerError, InvocationError};
use crate::retry::{RetryContext, RetryPolicy};
use crate::session::SessionManager;
use crate::update::{Event, EventFilter};

// ─── Handlers ─────────────────────────────────────────────────────────────────

/// Returned by [`Dispatcher::on`]; pass to [`Dispatcher::off`] to remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next:    u64,
    entries: Vec<(HandlerId, EventFilter, Handler)>,
}

/// Out-of-band reports from a running loop.
#[derive(Debug)]
pub enum Notice {
    /// A handler returned an error or panicked. The loop went on.
    HandlerFailed { handler: HandlerId, revision: i64, error: HandlerError },
    /// A poll failed; the same cursor is retried after `retry_in`.
    PollFailed { error: InvocationError, retry_in: Duration },
    /// The session is no longer authenticated. Polling is suspended.
    ReauthRequired,
    /// The session is authenticated again and polling has resumed.
    Resumed,
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

struct Inner {
    session:    Arc<SessionManager>,
    handlers:   RwLock<Registry>,
    batch_size: i32,
    backoff:    Arc<dyn RetryPolicy>,
}

/// Fetches operations for the session and fans them out to handlers.
///
/// Cheap to clone; clones share the handler registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(session: Arc<SessionManager>, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                handlers:   RwLock::new(Registry::default()),
                batch_size: config.poll_batch_size,
                backoff:    Arc::new(config.poll_backoff.clone()),
            }),
        }
    }

    /// Use `policy` instead of the configured backoff for poll failures.
    pub fn with_retry_policy(session: Arc<SessionManager>, config: &Config, policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                handlers:   RwLock::new(Registry::default()),
                batch_size: config.poll_batch_size,
                backoff:    policy,
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    // ── Registration ───────────────────────────────────────────────────────

    /// Register `handler` for events matching `filter`.
    ///
    /// Handlers run on the poll task, one event at a time, so a slow handler
    /// delays the next poll.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut reg = self.inner.handlers.write().unwrap_or_else(PoisonError::into_inner);
        reg.next += 1;
        let id = HandlerId(reg.next);
        reg.entries.push((id, filter.into(), Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut reg = self.inner.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = reg.entries.len();
        reg.entries.retain(|(h, _, _)| *h != id);
        reg.entries.len() != before
    }

    /// Run every handler matching `event`, in registration order.
    ///
    /// Returns the handlers that failed. Panics are caught and reported as
    /// failures too.
    pub fn dispatch(&self, event: &Event) -> Vec<(HandlerId, HandlerError)> {
        // run without the lock held so handlers may call on/off
        let matching: Vec<(HandlerId, Handler)> = {
            let reg = self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner);
            reg.entries.iter()
                .filter(|(_, filter, _)| filter.matches(event))
                .map(|(id, _, h)| (*id, h.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (id, handler) in matching {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(event)))
                .unwrap_or_else(|payload| Err(HandlerError::from_panic(&*payload)));
            if let Err(e) = outcome {
                log::warn!("[legy] handler {:?} failed on rev {}: {e}", id, event.revision());
                failed.push((id, e));
            }
        }
        failed
    }

    // ── Polling ────────────────────────────────────────────────────────────

    /// Seed a cursor from the newest revision the service knows about.
    pub async fn initial_cursor(&self) -> Result<PollCursor, InvocationError> {
        let reply = self.inner.session.invoke_once(Service::Talk, ops::last_revision()).await?;
        Ok(PollCursor::at(ops::read_last_revision(reply)?))
    }

    /// One long-poll round trip.
    ///
    /// Returns the fresh events in server order and the cursor for the next
    /// poll. A long poll that runs out of time is an empty batch with the
    /// same cursor.
    pub async fn poll_once(&self, cursor: &PollCursor) -> Result<(Vec<Event>, PollCursor), InvocationError> {
        let call = ops::fetch(cursor, self.inner.batch_size);
        let reply = match self.inner.session.invoke_once(Service::Poll, call).await {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => {
                log::trace!("[legy] long poll timed out at rev {}", cursor.revision);
                return Ok((Vec::new(), *cursor));
            }
            Err(e) => return Err(e),
        };

        let (fresh, next) = cursor.advance(ops::read_batch(reply)?);
        let credential = self.inner.session.credential();
        let own_id = credential.as_deref().and_then(|c| c.account_id());
        let events = fresh.into_iter().map(|op| Event::new(op, own_id)).collect();
        Ok((events, next))
    }

    /// Start the loop from a fresh cursor.
    pub fn spawn(&self, cancel: CancellationToken) -> DispatcherHandle {
        self.spawn_from(None, cancel)
    }

    /// Start the loop from `cursor`, or from a fresh one if `None`.
    pub fn spawn_from(&self, cursor: Option<PollCursor>, cancel: CancellationToken) -> DispatcherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let token = cancel.clone();
        let span = tracing::info_span!("legy_poll_loop", from = cursor.map(|c| c.revision));
        let join = tokio::spawn(async move { this.run(cursor, tx, token).await }.instrument(span));
        DispatcherHandle { notices: rx, join, cancel }
    }

    async fn run(
        self,
        mut cursor: Option<PollCursor>,
        notices:    mpsc::UnboundedSender<Notice>,
        cancel:     CancellationToken,
    ) -> Result<PollCursor, InvocationError> {
        let mut state = self.inner.session.subscribe();
        let mut fail_count   = NonZeroU32::MIN;
        let mut slept_so_far = Duration::default();

        loop {
            if cancel.is_cancelled() {
                log::debug!("[legy] poll loop cancelled");
                return Ok(cursor.unwrap_or_default());
            }

            let authenticated = state.borrow_and_update().is_authenticated();
            if !authenticated {
                log::info!("[legy] polling suspended until the session is authenticated");
                let _ = notices.send(Notice::ReauthRequired);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(cursor.unwrap_or_default()),
                        changed = state.changed() => {
                            if changed.is_err() {
                                return Err(InvocationError::Dropped);
                            }
                        }
                    }
                    let authenticated = state.borrow_and_update().is_authenticated();
                    if authenticated {
                        break;
                    }
                }
                log::info!("[legy] polling resumed");
                let _ = notices.send(Notice::Resumed);
                continue;
            }

            let result = match cursor {
                Some(c) => self.poll_once(&c).await,
                None    => self.initial_cursor().await.map(|c| (Vec::new(), c)),
            };

            match result {
                Ok((events, next)) => {
                    fail_count   = NonZeroU32::MIN;
                    slept_so_far = Duration::default();
                    for event in &events {
                        for (handler, error) in self.dispatch(event) {
                            let _ = notices.send(Notice::HandlerFailed {
                                handler,
                                revision: event.revision(),
                                error,
                            });
                        }
                    }
                    cursor = Some(next);
                }
                Err(e) if self.inner.session.is_auth_failure(&e) => {
                    // invalidated unless the token was replaced mid-poll; the next pass decides
                    log::warn!("[legy] poll rejected: {e}");
                }
                Err(error) => {
                    let ctx = RetryContext { fail_count, slept_so_far, error };
                    match self.inner.backoff.should_retry(&ctx) {
                        ControlFlow::Continue(delay) => {
                            let _ = notices.send(Notice::PollFailed { error: ctx.error, retry_in: delay });
                            tokio::select! {
                                _ = cancel.cancelled() => return Ok(cursor.unwrap_or_default()),
                                _ = sleep(delay) => {}
                            }
                            slept_so_far += delay;
                            fail_count = fail_count.saturating_add(1);
                        }
                        ControlFlow::Break(()) => {
                            log::error!("[legy] poll loop stopped: {}", ctx.error);
                            return Err(ctx.error);
                        }
                    }
                }
            }
        }
    }
}

// ─── DispatcherHandle ─────────────────────────────────────────────────────────

/// Owner's end of a running poll loop.
pub struct DispatcherHandle {
    /// Handler failures, poll failures and session suspensions.
    pub notices: mpsc::UnboundedReceiver<Notice>,
    join:        JoinHandle<Result<PollCursor, InvocationError>>,
    cancel:      CancellationToken,
}

impl DispatcherHandle {
    /// Ask the loop to stop at the next poll boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    /// Wait for the loop to end. Returns the last applied cursor, or the
    /// error that made it give up.
    pub async fn join(self) -> Result<PollCursor, InvocationError> {
        self.join.await.unwrap_or_else(|e| {
            log::error!("[legy] poll task ended abnormally: {e}");
            Err(InvocationError::Dropped)
        })
    }

    /// Cancel and wait.
    pub async fn stop(self) -> Result<PollCursor, InvocationError> {
        self.cancel();
        self.join().await
    }
}
