use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use navicue_stage::LifecycleTelemetry;
use parking_lot::Mutex;
use serde_json::Value;
use shared_event_bus::CueEvent;
use tokio::sync::watch;

/// Zero-argument callback owned by the host.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// What the host hands to a cue when mounting it.
#[derive(Default)]
pub struct HostContract {
    payload: Option<Value>,
    on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for HostContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContract")
            .field("payload", &self.payload)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl HostContract {
    /// Contract with no payload and no completion callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opaque data consumed only by the cue.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Callback invoked at most once when the cue completes.
    ///
    /// It usually runs inside a timer callback, and unmounting waits for an
    /// in-flight timer callback to return. It must therefore not block on a
    /// lock that a thread calling [`CueSession::unmount`] may hold.
    ///
    /// [`CueSession::unmount`]: crate::session::CueSession::unmount
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Splits the contract; a missing payload becomes `null`.
    #[must_use]
    pub fn into_parts(self) -> (Value, Option<CompletionCallback>) {
        (self.payload.unwrap_or(Value::Null), self.on_complete)
    }
}

/// One-shot completion for a mounted cue.
///
/// The first [`complete`](Self::complete) invokes the host callback; every
/// later call, and every call after [`disarm`](Self::disarm), does nothing.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    cue: String,
    spent: AtomicBool,
    callback: Mutex<Option<CompletionCallback>>,
    done: watch::Sender<bool>,
    telemetry: Option<LifecycleTelemetry>,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("cue", &self.inner.cue)
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Completion {
    /// Wraps an optional host callback.
    #[must_use]
    pub fn new(
        cue: impl Into<String>,
        callback: Option<CompletionCallback>,
        telemetry: Option<LifecycleTelemetry>,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(CompletionInner {
                cue: cue.into(),
                spent: AtomicBool::new(false),
                callback: Mutex::new(callback),
                done,
                telemetry,
            }),
        }
    }

    /// Fires the completion. Returns `true` only for the call that fired it.
    pub fn complete(&self) -> bool {
        if self.inner.spent.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = self.inner.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        self.inner.done.send_replace(true);
        tracing::info!(cue = %self.inner.cue, "cue completed");
        if let Some(tel) = &self.inner.telemetry {
            tel.publish(CueEvent::completed(&self.inner.cue));
        }
        true
    }

    /// Prevents any future completion without invoking the callback.
    /// Returns `true` if the completion had not fired yet.
    pub fn disarm(&self) -> bool {
        if self.inner.spent.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = self.inner.callback.lock().take();
        drop(callback);
        true
    }

    /// Whether the host callback was invoked.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Waits until the completion fires. Never resolves for a disarmed
    /// completion that did not fire.
    pub async fn wait(&self) {
        let mut done = self.inner.done.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, CompletionCallback) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        (
            calls,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn completes_exactly_once() {
        let (calls, callback) = counting();
        let completion = Completion::new("tap-ripple", Some(callback), None);
        let other = completion.clone();
        assert!(completion.complete());
        assert!(!other.complete());
        assert!(!completion.complete());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(completion.is_completed());
    }

    #[test]
    fn disarmed_completion_never_calls_the_host() {
        let (calls, callback) = counting();
        let completion = Completion::new("breath-hold", Some(callback), None);
        assert!(completion.disarm());
        assert!(!completion.complete());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!completion.is_completed());
    }

    #[test]
    fn completion_without_callback_still_marks_done() {
        let completion = Completion::new("choice-fork", None, None);
        assert!(completion.complete());
        assert!(completion.is_completed());
    }

    #[tokio::test]
    async fn wait_resolves_after_complete() {
        let completion = Completion::new("cue", None, None);
        let waiter = completion.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        completion.complete();
        task.await.unwrap();
    }

    #[test]
    fn contract_defaults_payload_to_null() {
        let (payload, callback) = HostContract::new().into_parts();
        assert_eq!(payload, Value::Null);
        assert!(callback.is_none());

        let (payload, callback) = HostContract::new()
            .payload(json!({ "taps": 2 }))
            .on_complete(|| {})
            .into_parts();
        assert_eq!(payload["taps"], 2);
        assert!(callback.is_some());
    }
}
