//! Command queue and dispatcher for the controller link.
//!
//! A [`Controller`] owns a dedicated link thread which in turn owns the
//! [`Connection`]. All wire writes happen on that thread, so concurrent
//! callers queue instead of interleaving, and replies are matched to commands
//! strictly in send order. One command is outstanding at a time; the next
//! queued command is not written until the current one resolves.
//!
//! Callers get an async API: `send_command` suspends on a oneshot until the
//! link thread observes the reply terminator, the per-command deadline
//! expires, or the connection drops.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::connection::Connection;
use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_ERROR_TAG, DEFAULT_HISTORY_LIMIT, DEFAULT_INFO_TAG,
    DEFAULT_NOTIFICATION_CAPACITY, DEFAULT_NOTIFY_PREFIX, DEFAULT_OK_TAG, SEND_QUEUE_CAPACITY,
};
use crate::error::{CncError, Result};
use crate::history::{CommandHistory, CommandState, SentCommand};
use crate::reply::{Classification, Phase, ReplyClassifier};

/// Tunables for one controller link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Reply line that terminates a command; empty means every line does.
    pub ok_tag: String,
    /// Prefix of firmware error replies (terminate the command).
    pub error_tag: String,
    /// Prefix of informational replies (do not terminate).
    pub info_tag: String,
    /// Prefix of unsolicited notification lines.
    pub notify_prefix: String,
    /// Default reply deadline per command.
    pub command_timeout: Duration,
    /// Capacity of the command history ring.
    pub history_limit: usize,
    /// Capacity of the notification channel.
    pub notification_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            ok_tag: DEFAULT_OK_TAG.to_string(),
            error_tag: DEFAULT_ERROR_TAG.to_string(),
            info_tag: DEFAULT_INFO_TAG.to_string(),
            notify_prefix: DEFAULT_NOTIFY_PREFIX.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

struct SendRequest {
    text: String,
    timeout: Duration,
    reply: oneshot::Sender<Result<String>>,
}

/// Dispatcher for one controller connection.
pub struct Controller {
    req_tx: mpsc::Sender<SendRequest>,
    notify_rx: Mutex<Option<mpsc::Receiver<String>>>,
    history: Arc<Mutex<CommandHistory>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    link: Mutex<Option<JoinHandle<()>>>,
    default_timeout: Duration,
}

impl Controller {
    /// Take ownership of a connection and start the link thread.
    pub fn start<C: Connection>(connection: C, options: LinkOptions) -> Result<Self> {
        let (req_tx, req_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(options.notification_capacity.max(1));
        let history = Arc::new(Mutex::new(CommandHistory::new(options.history_limit)));
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let classifier = ReplyClassifier::new(
            &options.ok_tag,
            &options.error_tag,
            &options.info_tag,
            &options.notify_prefix,
        );

        let thread = LinkThread {
            connection,
            req_rx,
            notify_tx,
            classifier,
            history: Arc::clone(&history),
            connected: Arc::clone(&connected),
            shutdown: Arc::clone(&shutdown),
            in_flight: None,
        };
        let link = std::thread::Builder::new()
            .name("cnc-link".to_string())
            .spawn(move || thread.run())
            .map_err(CncError::Io)?;

        Ok(Controller {
            req_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            history,
            connected,
            shutdown,
            link: Mutex::new(Some(link)),
            default_timeout: options.command_timeout,
        })
    }

    /// Send one command and await its full reply text.
    pub async fn send_command(&self, text: &str) -> Result<String> {
        self.send_command_timeout(text, self.default_timeout).await
    }

    /// Send one command with an explicit reply deadline.
    pub async fn send_command_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        if !self.is_connected() {
            return Err(CncError::Disconnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SendRequest {
            text: text.to_string(),
            timeout,
            reply: reply_tx,
        };
        self.req_tx
            .send(request)
            .await
            .map_err(|_| CncError::Disconnected)?;
        reply_rx.await.map_err(|_| CncError::Disconnected)?
    }

    /// Send a sequence of commands, each fully acknowledged before the next
    /// is written to the wire. Execution order on the machine matches the
    /// iteration order.
    pub async fn send_commands<I, S>(&self, lines: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replies = Vec::new();
        for line in lines {
            replies.push(self.send_command(line.as_ref()).await?);
        }
        Ok(replies)
    }

    /// Immutable snapshot of the command history.
    pub fn command_history(&self) -> Vec<SentCommand> {
        self.history.lock().unwrap().snapshot()
    }

    pub fn clear_command_history(&self) {
        self.history.lock().unwrap().clear();
    }

    /// Persist the command history to a file.
    pub fn write_command_history<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.history.lock().unwrap().save(path)
    }

    /// Take the receiver for unsolicited notification lines.
    ///
    /// Available once; returns `None` if already taken.
    pub fn notifications(&self) -> Option<mpsc::Receiver<String>> {
        self.notify_rx.lock().unwrap().take()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shut the link down. Pending and queued commands resolve with
    /// [`CncError::Disconnected`].
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.link.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("link thread panicked during shutdown");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}

struct InFlight {
    text: String,
    deadline: Instant,
    phase: Phase,
    lines: Vec<String>,
    reply: oneshot::Sender<Result<String>>,
}

struct LinkThread<C: Connection> {
    connection: C,
    req_rx: mpsc::Receiver<SendRequest>,
    notify_tx: mpsc::Sender<String>,
    classifier: ReplyClassifier,
    history: Arc<Mutex<CommandHistory>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    in_flight: Option<InFlight>,
}

impl<C: Connection> LinkThread<C> {
    fn run(mut self) {
        info!("link thread started");
        let reason = self.pump();
        self.fail_pending();
        self.connection.close();
        self.connected.store(false, Ordering::SeqCst);
        info!("link thread stopped ({reason})");
    }

    /// Main loop; returns a human-readable stop reason.
    fn pump(&mut self) -> &'static str {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return "closed";
            }

            if self.in_flight.is_none() {
                match self.req_rx.try_recv() {
                    Ok(request) => {
                        if !self.begin_command(request) {
                            return "write error";
                        }
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return "controller dropped",
                }
            }

            self.check_deadline();

            match self.connection.read_line() {
                Ok(Some(line)) => self.handle_line(line),
                Ok(None) => {
                    // Idle tick. The serial poll interval provides pacing for
                    // real ports; keep mock transports from spinning.
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    error!("read failed: {e}");
                    return "read error";
                }
            }
        }
    }

    /// Write a queued command to the wire and open its history entry.
    /// Returns false if the write failed and the link must go down.
    fn begin_command(&mut self, request: SendRequest) -> bool {
        debug!("sending {:?}", request.text);
        self.history.lock().unwrap().append(&request.text);
        if let Err(e) = self.connection.write_line(&request.text) {
            error!("write failed: {e}");
            self.history
                .lock()
                .unwrap()
                .resolve_last("", CommandState::Failed);
            let _ = request.reply.send(Err(CncError::Disconnected));
            return false;
        }
        self.in_flight = Some(InFlight {
            deadline: Instant::now() + request.timeout,
            text: request.text,
            phase: Phase::AwaitingEcho,
            lines: Vec::new(),
            reply: request.reply,
        });
        true
    }

    fn check_deadline(&mut self) {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|p| Instant::now() >= p.deadline);
        if expired {
            let pending = self.in_flight.take().expect("deadline checked above");
            warn!("command {:?} timed out", pending.text);
            self.history
                .lock()
                .unwrap()
                .resolve_last(&pending.lines.join("\n"), CommandState::TimedOut);
            let _ = pending.reply.send(Err(CncError::Timeout {
                command: pending.text,
            }));
        }
    }

    fn handle_line(&mut self, line: String) {
        let pending = self
            .in_flight
            .as_ref()
            .map(|p| (p.text.as_str(), p.phase));
        match self.classifier.classify(&line, pending) {
            Classification::Notification => self.notify(line),
            Classification::Echo => {
                if let Some(p) = self.in_flight.as_mut() {
                    p.phase = Phase::AwaitingReply;
                }
            }
            Classification::Info | Classification::Partial => {
                if let Some(p) = self.in_flight.as_mut() {
                    p.phase = Phase::AwaitingReply;
                    p.lines.push(line);
                }
            }
            Classification::Ack => self.resolve(line, CommandState::Ok),
            Classification::Fault => self.resolve(line, CommandState::Error),
        }
    }

    /// Forward an unsolicited line without ever blocking reply matching.
    fn notify(&mut self, line: String) {
        debug!("unsolicited line: {:?}", line);
        match self.notify_tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                warn!("notification channel full, dropping {:?}", line);
            }
            Err(TrySendError::Closed(_)) => {
                // No consumer registered; telemetry is discardable.
            }
        }
    }

    fn resolve(&mut self, terminator: String, state: CommandState) {
        let Some(mut pending) = self.in_flight.take() else {
            return;
        };
        pending.lines.push(terminator);
        let text = pending.lines.join("\n");
        debug!("command {:?} resolved: {:?}", pending.text, state);
        self.history.lock().unwrap().resolve_last(&text, state);
        let _ = pending.reply.send(Ok(text));
    }

    /// Fail the in-flight command and everything still queued.
    fn fail_pending(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            self.history
                .lock()
                .unwrap()
                .resolve_last(&pending.lines.join("\n"), CommandState::Failed);
            let _ = pending.reply.send(Err(CncError::Disconnected));
        }
        self.req_rx.close();
        while let Ok(request) = self.req_rx.try_recv() {
            let _ = request.reply.send(Err(CncError::Disconnected));
        }
    }
}
