//! Build log tailing
//!
//! While the downstream command runs, a background thread echoes whatever is
//! appended to its build log. The thread shares only the log path and a stop
//! flag with the caller and is joined when the step completes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};

/// A running log follower.
pub struct LogTail {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

impl LogTail {
    /// Follow `path`, echoing to stderr.
    pub fn spawn(path: &Path, poll: Duration) -> Self {
        Self::spawn_with(path, poll, io::stderr())
    }

    /// Follow `path`, echoing to `writer`.
    ///
    /// The file does not need to exist yet.
    pub fn spawn_with<W>(path: &Path, poll: Duration, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let path = path.to_path_buf();
            thread::spawn(move || follow(&path, poll, &stop, writer))
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop following, echo anything still unread, and return the number of
    /// bytes echoed in total.
    pub fn stop(mut self) -> Result<u64> {
        self.finish()
    }

    fn finish(&mut self) -> Result<u64> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => Ok(result?),
                Err(_) => Err(Error::Filesystem {
                    message: "log tail thread panicked".to_string(),
                }),
            },
            None => Ok(0),
        }
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

fn follow<W: Write>(
    path: &Path,
    poll: Duration,
    stop: &AtomicBool,
    mut writer: W,
) -> io::Result<u64> {
    let mut offset = 0u64;
    let mut buffer = Vec::new();
    loop {
        // Read the flag first so a final drain sees everything written
        // before the stop was requested.
        let stopping = stop.load(Ordering::SeqCst);

        if let Ok(mut file) = File::open(path) {
            let len = file.metadata()?.len();
            if len < offset {
                offset = 0;
            }
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                buffer.clear();
                file.take(len - offset).read_to_end(&mut buffer)?;
                writer.write_all(&buffer)?;
                writer.flush()?;
                offset += buffer.len() as u64;
            }
        }

        if stopping {
            return Ok(offset);
        }
        thread::sleep(poll);
    }
}
