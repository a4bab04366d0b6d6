//! Following a growing metrics file

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::Result;

/// Wait until `path` exists.
///
/// Polls with exponential backoff from `initial` up to `max`. Errors other
/// than "not found" are logged and polling continues.
pub async fn wait_for_file(path: &Path, initial: Duration, max: Duration) {
    let mut delay = initial;
    loop {
        match tokio::fs::metadata(path).await {
            Ok(_) => return,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), ?delay, "Metrics file not there yet");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat metrics file");
            }
        }
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2).min(max);
    }
}

/// Line reader over a file that is still being written.
///
/// Partial lines are held back until their newline arrives. At end of file
/// the reader sleeps `poll_interval` and tries again.
pub struct FileTail {
    reader: BufReader<File>,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl FileTail {
    /// Open `path` from the start.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be opened.
    pub async fn open(path: &Path, poll_interval: Duration) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            reader: BufReader::new(file),
            pending: Vec::new(),
            poll_interval,
        })
    }

    /// Next complete line, without its line terminator.
    ///
    /// Waits for more data indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on read failure.
    pub async fn next_line(&mut self) -> Result<String> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if self.pending.last() == Some(&b'\n') {
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw);
                return Ok(line.trim_end_matches(['\n', '\r']).to_string());
            }
            if read == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}
