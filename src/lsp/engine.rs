//! JSON-RPC engine for one language server child.
//!
//! One engine owns one child: a single reader task consumes the child's
//! stdout and dispatches each frame either to the pending-request table
//! (frames carrying an `id`) or to the engine's notification channel
//! (frames carrying a `method` and no `id`). Writes happen on the caller's
//! task under the stdin mutex, which is never held across a response await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use super::codec;
use super::process::ServerProcess;
use super::LspError;

/// Capacity of the per-engine notification channel. On overflow the newest
/// frame is dropped and logged; the reader never blocks on a slow consumer.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;

type PendingTable = Arc<StdMutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A running language server together with its correlation state.
pub struct LspEngine {
    language: String,
    stdin: Mutex<ChildStdin>,
    process: Mutex<Option<ServerProcess>>,
    next_id: AtomicU64,
    pending: PendingTable,
    running: Arc<AtomicBool>,
}

impl LspEngine {
    /// Spawns the server process and starts the reader task.
    ///
    /// Returns the engine plus the receiving end of its notification
    /// channel; the registry moves that stream into the merged channel.
    pub fn spawn(
        language: &str,
        server_path: &str,
        compile_commands_dir: Option<&str>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Value>), LspError> {
        let (process, stdin, stdout) =
            ServerProcess::spawn(language, server_path, compile_commands_dir)?;

        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let pending: PendingTable = Arc::new(StdMutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(read_loop(
            language.to_string(),
            BufReader::new(stdout),
            pending.clone(),
            notif_tx,
            running.clone(),
        ));

        let engine = Arc::new(Self {
            language: language.to_string(),
            stdin: Mutex::new(stdin),
            process: Mutex::new(Some(process)),
            next_id: AtomicU64::new(1),
            pending,
            running,
        });
        Ok((engine, notif_rx))
    }

    /// Sends a request and awaits the correlated response frame.
    ///
    /// The returned value is the entire response body (including `result`
    /// or `error`); no interpretation happens here. Fails with
    /// [`LspError::NotRunning`] if the engine was shut down before the call
    /// and [`LspError::PeerClosed`] if the child's stdout closes before the
    /// response arrives. Dropping the returned future cancels the request:
    /// its pending entry is removed and a late response is discarded.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(LspError::NotRunning);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_frame(&frame).await?;

        rx.await.map_err(|_| LspError::PeerClosed)
    }

    /// Sends a notification. No id is allocated and no response is awaited.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(LspError::NotRunning);
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_frame(&frame).await
    }

    /// Whether the child is believed alive (reader still attached).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Kills the child and fails every outstanding request.
    ///
    /// The reader task observes the closed stdout, drops all pending sinks
    /// (waking their awaiters with [`LspError::PeerClosed`]) and closes the
    /// notification channel, which in turn stops the registry's forwarder.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(mut process) = self.process.lock().await.take() {
            debug!(language = %self.language, "shutting down language server");
            process.kill().await;
        }
    }

    async fn write_frame(&self, frame: &Value) -> Result<(), LspError> {
        let body = serde_json::to_vec(frame)?;
        let mut stdin = self.stdin.lock().await;
        codec::write_frame(&mut *stdin, &body).await
    }
}

/// Removes a request's pending entry when its awaiter goes away, however it
/// goes away. Removal after a delivered response is a no-op.
struct PendingGuard {
    pending: PendingTable,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

fn lock_pending(pending: &StdMutex<HashMap<u64, oneshot::Sender<Value>>>) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    // The table is touched only in short non-panicking sections; recover the
    // guard rather than poisoning the whole engine.
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Single owner of the child's stdout. Ends on the first codec error, then
/// fails all outstanding requests and closes the notification channel.
async fn read_loop(
    language: String,
    mut reader: BufReader<ChildStdout>,
    pending: PendingTable,
    notif_tx: mpsc::Sender<Value>,
    running: Arc<AtomicBool>,
) {
    loop {
        let body = match codec::read_frame(&mut reader).await {
            Ok(body) => body,
            Err(LspError::PeerClosed) => {
                debug!(language = %language, "language server closed stdout");
                break;
            }
            Err(e) => {
                warn!(language = %language, err = %e, "reader stopped on frame error");
                break;
            }
        };

        let frame: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(language = %language, err = %e, "unparseable frame from language server");
                continue;
            }
        };

        if let Some(id_value) = frame.get("id") {
            let Some(id) = id_value.as_u64() else {
                debug!(language = %language, "discarding frame with non-numeric id");
                continue;
            };
            match lock_pending(&pending).remove(&id) {
                // A send error means the awaiter vanished between removal
                // and delivery; the frame is dropped either way.
                Some(sink) => {
                    let _ = sink.send(frame);
                }
                None => {
                    debug!(language = %language, id, "response with no pending request, dropping");
                }
            }
        } else if frame.get("method").is_some() {
            match notif_tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(language = %language, "notification channel full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        // Frames with neither id nor method are ignored.
    }

    running.store(false, Ordering::Release);
    // Dropping the sinks wakes every awaiter with PeerClosed.
    lock_pending(&pending).clear();
    // notif_tx drops here, closing the notification stream.
}
