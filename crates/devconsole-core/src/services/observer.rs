//! Observer surface shared by the run and eval services.

use tokio::sync::mpsc;

use crate::domain::{ChatMessage, LogMessage, TraceMessage};

/// Change notifications from a service.
///
/// Called on the executing task after the service lock has been released,
/// with a snapshot of the run taken right after the mutation. Each
/// `on_run_updated` means "state may have changed".
pub trait RunObserver<R>: Send + Sync {
    fn on_run_updated(&self, _run: &R) {}
    fn on_log(&self, _log: &LogMessage) {}
    fn on_trace(&self, _trace: &TraceMessage) {}
    /// Only sent by `RunService`.
    fn on_chat(&self, _chat: &ChatMessage) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<R> RunObserver<R> for NoopObserver {}

/// Notification forwarded by [`ChannelObserver`].
#[derive(Debug, Clone)]
pub enum ServiceEvent<R> {
    RunUpdated(R),
    Log(LogMessage),
    Trace(TraceMessage),
    Chat(ChatMessage),
}

/// Forwards notifications into an unbounded channel.
pub struct ChannelObserver<R> {
    tx: mpsc::UnboundedSender<ServiceEvent<R>>,
}

impl<R> ChannelObserver<R> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceEvent<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ServiceEvent<R>) {
        let _ = self.tx.send(event);
    }
}

impl<R: Clone + Send + Sync> RunObserver<R> for ChannelObserver<R> {
    fn on_run_updated(&self, run: &R) {
        self.send(ServiceEvent::RunUpdated(run.clone()));
    }

    fn on_log(&self, log: &LogMessage) {
        self.send(ServiceEvent::Log(log.clone()));
    }

    fn on_trace(&self, trace: &TraceMessage) {
        self.send(ServiceEvent::Trace(trace.clone()));
    }

    fn on_chat(&self, chat: &ChatMessage) {
        self.send(ServiceEvent::Chat(chat.clone()));
    }
}
