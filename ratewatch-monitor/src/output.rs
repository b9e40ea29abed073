//! Output backends for mirroring monitor updates.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::state::MonitorState;

/// Output destination for monitor updates.
///
/// Every update is delivered on a best-effort basis. Each delivery is bounded
/// by the monitor's `output_timeout` and abandoned on stop, so a stuck sink
/// delays a tick by at most that long.
#[derive(Debug)]
pub enum Output {
    /// Write the latest state to a JSON file.
    ///
    /// The file is overwritten with each update.
    File(PathBuf),

    /// Send updates to a TCP server.
    ///
    /// Each update is sent as a newline-delimited JSON message.
    Tcp(String),

    /// Send updates through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    Channel(mpsc::Sender<MonitorState>),
}

impl Output {
    /// Create a file output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ratewatch_monitor::Output;
    ///
    /// let output = Output::file("rates.json");
    /// ```
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Output::File(path.into())
    }

    /// Create a TCP output.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// ```rust
    /// use ratewatch_monitor::Output;
    ///
    /// let (output, mut rx) = Output::channel(16);
    ///
    /// // Later, receive updates
    /// // while let Some(state) = rx.recv().await {
    /// //     println!("tick {}: {} flags", state.tick, state.flags.len());
    /// // }
    /// ```
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<MonitorState>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Output::File(_) => "file",
            Output::Tcp(_) => "tcp",
            Output::Channel(_) => "channel",
        }
    }

    /// Emit a state to this output.
    pub(crate) async fn emit(&self, state: &MonitorState) -> std::io::Result<()> {
        match self {
            Output::File(path) => {
                let json = serde_json::to_string_pretty(state)?;
                tokio::fs::write(path, json).await?;
            }
            Output::Tcp(addr) => {
                use tokio::io::AsyncWriteExt;
                use tokio::net::TcpStream;

                let mut stream = TcpStream::connect(addr).await?;
                let mut json = serde_json::to_vec(state)?;
                json.push(b'\n');
                stream.write_all(&json).await?;
            }
            Output::Channel(tx) => {
                // Don't block if the channel is full
                let _ = tx.try_send(state.clone());
            }
        }
        Ok(())
    }
}
