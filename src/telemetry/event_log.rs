use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Id used for events with no connection context (startup, accept failures).
pub const NO_ID: &str = "(no-id)";

/// The serialized per-request event log.
///
/// Each connection emits one line per event, `<id>: <text>`. Handles are
/// cheap clones of an unbounded channel sender; a single writer task appends
/// lines to the log file and flushes after each one, so concurrent
/// connections never interleave within a line.
#[derive(Clone)]
pub struct EventLog {
    sender: mpsc::UnboundedSender<String>,
}

impl EventLog {
    /// Starts the writer task appending to `log_path`. The parent directory
    /// is created if needed.
    pub fn new(log_path: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let path = log_path.to_string();

        tokio::spawn(async move {
            if let Some(parent) = std::path::Path::new(&path).parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }

            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;

            match file {
                Ok(mut f) => {
                    info!("Event log writer started: {}", path);
                    while let Some(line) = receiver.recv().await {
                        let line = format!("{line}\n");
                        if let Err(e) = f.write_all(line.as_bytes()).await {
                            error!("Failed to write event log: {}", e);
                        }
                        let _ = f.flush().await;
                    }
                }
                Err(e) => {
                    error!("Failed to open event log file {}: {}", path, e);
                    // Drain the channel to avoid unbounded buildup
                    while receiver.recv().await.is_some() {}
                }
            }
        });

        Self { sender }
    }

    /// Non-blocking event submission for one connection.
    pub fn log(&self, id: &str, text: impl AsRef<str>) {
        let _ = self.sender.send(format!("{id}: {}", text.as_ref()));
    }

    /// Events outside any connection: startup, accept failures.
    pub fn server(&self, text: impl AsRef<str>) {
        self.log(NO_ID, text);
    }
}
