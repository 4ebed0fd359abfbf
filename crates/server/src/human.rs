//! Human-in-the-loop channel — ask and approval request/response pairs.
//!
//! Each outstanding request is a oneshot resolver keyed by request id.
//! A request resolves at most once; unknown ids are ignored; disposal
//! rejects every pending request with a terminal error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use cw_domain::error::{Error, Result};
use cw_domain::wire::ServerEvent;

use crate::state::EventSink;

enum Pending {
    Ask(oneshot::Sender<Result<String>>),
    Approval(oneshot::Sender<Result<bool>>),
}

/// Registry of outstanding ask/approval requests for one session.
pub struct HumanChannel {
    pending: Mutex<HashMap<String, Pending>>,
    emit: EventSink,
    yolo: AtomicBool,
    disposed: AtomicBool,
}

impl HumanChannel {
    pub fn new(emit: EventSink, yolo: bool) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            emit,
            yolo: AtomicBool::new(yolo),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn set_yolo(&self, yolo: bool) {
        self.yolo.store(yolo, Ordering::SeqCst);
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo.load(Ordering::SeqCst)
    }

    /// Pose a question to the human; resolves with their answer.
    pub async fn ask(&self, question: &str) -> Result<String> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::SessionDisposed("session disposed".into()));
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), Pending::Ask(tx));

        (self.emit)(ServerEvent::Ask { request_id, question: question.to_owned() });

        rx.await
            .unwrap_or_else(|_| Err(Error::SessionDisposed("session disposed".into())))
    }

    /// Request approval for a gated command.
    ///
    /// The `yolo` flag short-circuits to `true` without emitting.
    pub async fn approve(
        &self,
        command: &str,
        dangerous: bool,
        reason_code: Option<String>,
    ) -> Result<bool> {
        let request_id = Uuid::new_v4().to_string();
        self.approve_as(&request_id, command, dangerous, reason_code).await
    }

    /// Like [`approve`](Self::approve) but with a caller-chosen request
    /// id, so the dispatcher can mirror the request onto the model stream.
    pub async fn approve_as(
        &self,
        request_id: &str,
        command: &str,
        dangerous: bool,
        reason_code: Option<String>,
    ) -> Result<bool> {
        if self.yolo.load(Ordering::SeqCst) {
            return Ok(true);
        }
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::SessionDisposed("session disposed".into()));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.to_owned(), Pending::Approval(tx));

        (self.emit)(ServerEvent::Approval {
            request_id: request_id.to_owned(),
            command: command.to_owned(),
            dangerous,
            reason_code,
        });

        rx.await
            .unwrap_or_else(|_| Err(Error::SessionDisposed("session disposed".into())))
    }

    /// Resolve a pending ask. Unknown or already-resolved ids are no-ops.
    pub fn resolve_ask(&self, request_id: &str, answer: String) {
        let mut pending = self.pending.lock();
        match pending.remove(request_id) {
            Some(Pending::Ask(tx)) => {
                drop(pending);
                let _ = tx.send(Ok(answer));
            }
            Some(other) => {
                // Wrong kind: put it back rather than lose the resolver.
                pending.insert(request_id.to_owned(), other);
                tracing::warn!(request_id, "ask_response for a non-ask request, ignoring");
            }
            None => {}
        }
    }

    /// Resolve a pending approval. Unknown or already-resolved ids are no-ops.
    pub fn resolve_approval(&self, request_id: &str, approved: bool) {
        let mut pending = self.pending.lock();
        match pending.remove(request_id) {
            Some(Pending::Approval(tx)) => {
                drop(pending);
                let _ = tx.send(Ok(approved));
            }
            Some(other) => {
                pending.insert(request_id.to_owned(), other);
                tracing::warn!(request_id, "approval_response for a non-approval request, ignoring");
            }
            None => {}
        }
    }

    /// Reject every pending request with a terminal error. Further
    /// resolve calls become no-ops.
    pub fn dispose_all(&self, reason: &str) {
        self.disposed.store(true, Ordering::SeqCst);
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        for entry in drained {
            match entry {
                Pending::Ask(tx) => {
                    let _ = tx.send(Err(Error::SessionDisposed(reason.to_owned())));
                }
                Pending::Approval(tx) => {
                    let _ = tx.send(Err(Error::SessionDisposed(reason.to_owned())));
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn channel_with_log(yolo: bool) -> (Arc<HumanChannel>, Arc<Mutex<Vec<ServerEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let emit: EventSink = Arc::new(move |ev| log2.lock().push(ev));
        (Arc::new(HumanChannel::new(emit, yolo)), log)
    }

    fn emitted_request_id(log: &Mutex<Vec<ServerEvent>>) -> String {
        match log.lock().last().expect("an event was emitted") {
            ServerEvent::Ask { request_id, .. } => request_id.clone(),
            ServerEvent::Approval { request_id, .. } => request_id.clone(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn ask_resolves_with_answer() {
        let (channel, log) = channel_with_log(false);
        let ch = channel.clone();
        let task = tokio::spawn(async move { ch.ask("favorite color?").await });

        tokio::task::yield_now().await;
        let id = emitted_request_id(&log);
        channel.resolve_ask(&id, "blue".into());

        assert_eq!(task.await.unwrap().unwrap(), "blue");
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn approval_resolves_with_decision() {
        let (channel, log) = channel_with_log(false);
        let ch = channel.clone();
        let task = tokio::spawn(async move { ch.approve("rm -rf /", true, None).await });

        tokio::task::yield_now().await;
        let id = emitted_request_id(&log);
        channel.resolve_approval(&id, false);

        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn yolo_short_circuits_without_emitting() {
        let (channel, log) = channel_with_log(true);
        assert!(channel.approve("rm -rf /", true, None).await.unwrap());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_silently_ignored() {
        let (channel, _log) = channel_with_log(false);
        channel.resolve_ask("ghost", "answer".into());
        channel.resolve_approval("ghost", true);
    }

    #[tokio::test]
    async fn each_request_resolves_at_most_once() {
        let (channel, log) = channel_with_log(false);
        let ch = channel.clone();
        let task = tokio::spawn(async move { ch.ask("q?").await });

        tokio::task::yield_now().await;
        let id = emitted_request_id(&log);
        channel.resolve_ask(&id, "first".into());
        channel.resolve_ask(&id, "second".into());

        assert_eq!(task.await.unwrap().unwrap(), "first");
    }

    #[tokio::test]
    async fn dispose_rejects_all_pending_and_future_resolves_are_noops() {
        let (channel, log) = channel_with_log(false);

        let ch1 = channel.clone();
        let ask = tokio::spawn(async move { ch1.ask("q?").await });
        let ch2 = channel.clone();
        let approval = tokio::spawn(async move { ch2.approve("cmd", false, None).await });
        tokio::task::yield_now().await;
        assert_eq!(channel.pending_count(), 2);

        channel.dispose_all("session disposed");

        let ask_err = ask.await.unwrap().unwrap_err();
        assert!(matches!(ask_err, Error::SessionDisposed(_)));
        let approval_err = approval.await.unwrap().unwrap_err();
        assert!(matches!(approval_err, Error::SessionDisposed(_)));

        // A resolve after disposal does nothing.
        let id = emitted_request_id(&log);
        channel.resolve_ask(&id, "late".into());

        // New requests fail immediately.
        let err = channel.ask("again?").await.unwrap_err();
        assert!(matches!(err, Error::SessionDisposed(_)));
    }
}
