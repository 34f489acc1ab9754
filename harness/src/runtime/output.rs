//! Worker output plumbing
//!
//! Both pipes of a worker are read line by line on their own tasks and
//! merged into one channel, so a chatty stderr can never block stdout (and
//! the other way around). Bytes are decoded exactly once, here.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSource::Stdout => write!(f, "stdout"),
            OutputSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded line of worker output, without its line terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: OutputSource,
    pub text: String,
}

/// Spawn one reader per pipe feeding a single combined stream.
///
/// The receiver yields `None` once both pipes have reached end of file.
pub fn spawn_output_readers(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> mpsc::UnboundedReceiver<OutputLine> {
    let (tx, rx) = mpsc::unbounded_channel();

    if let Some(stdout) = stdout {
        tokio::spawn(forward_lines(stdout, OutputSource::Stdout, tx.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(forward_lines(stderr, OutputSource::Stderr, tx.clone()));
    }

    rx
}

async fn forward_lines<R>(pipe: R, source: OutputSource, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(pipe).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = OutputLine {
                    source,
                    text: decode_line(&bytes),
                };
                // Keep draining after the receiver is gone so the worker
                // never blocks on a full pipe.
                let _ = tx.send(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("📭 {} reader stopped: {}", source, e);
                break;
            }
        }
    }
}

/// Lossy UTF-8 decode with the trailing carriage return removed
pub fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

/// Bounded record of the most recent output lines of one worker
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
