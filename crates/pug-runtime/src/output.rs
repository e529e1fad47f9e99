//! Replayable task output.
//!
//! A task's stdout and stderr are appended to one [`OutputBuffer`] in
//! write order. Any number of [`OutputReader`]s can be created at any
//! time; each starts from the first byte ever written, replays the
//! history and then follows live output until the buffer is closed.
//!
//! ```text
//!   child stdout ─┐
//!                 ├─► write ─► [ b0 b1 b2 ... bn ]  ◄─ close
//!   child stderr ─┘                │       │
//!                         reader A ┘       └ reader B (attached late)
//!                         pos = 2            pos = 0
//! ```
//!
//! The byte vector is guarded by a short lock; progress (length and
//! closed flag) is broadcast over a `watch` channel that readers await
//! when they have caught up.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Progress {
    len: usize,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    data: Mutex<Vec<u8>>,
    progress: watch::Sender<Progress>,
}

/// Append-only byte buffer with replay readers.
///
/// Cloning yields another handle to the same buffer.
///
/// # Example
///
/// ```
/// use pug_runtime::OutputBuffer;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let buf = OutputBuffer::new();
/// buf.write(b"hello ");
/// let mut late = buf.reader();
/// buf.write(b"world");
/// buf.close();
///
/// assert_eq!(late.read_to_end().await, b"hello world");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    shared: Arc<Shared>,
    primary: Arc<tokio::sync::Mutex<OutputReader>>,
}

impl OutputBuffer {
    /// Creates an empty, open buffer.
    #[must_use]
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        let shared = Arc::new(Shared {
            data: Mutex::new(Vec::new()),
            progress,
        });
        let primary = Arc::new(tokio::sync::Mutex::new(OutputReader::attach(&shared)));
        Self { shared, primary }
    }

    /// Appends bytes and wakes waiting readers.
    ///
    /// Writes after [`close`](Self::close) are discarded.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let len = {
            let mut data = self.shared.data.lock();
            if self.shared.progress.borrow().closed {
                return;
            }
            data.extend_from_slice(bytes);
            data.len()
        };
        self.shared.progress.send_modify(|p| p.len = len);
    }

    /// Marks the end of output. Readers drain what remains, then see
    /// end-of-stream.
    pub fn close(&self) {
        let _data = self.shared.data.lock();
        self.shared.progress.send_modify(|p| p.closed = true);
    }

    /// Reads from the buffer's own cursor.
    ///
    /// Returns immediately if unread bytes exist; otherwise waits for a
    /// write or for close. Returns `0` at end-of-stream.
    pub async fn read(&self, dst: &mut [u8]) -> usize {
        self.primary.lock().await.read(dst).await
    }

    /// Creates a reader that replays from the first byte.
    #[must_use]
    pub fn reader(&self) -> OutputReader {
        OutputReader::attach(&self.shared)
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.shared.data.lock().clone()
    }

    /// Returns everything written so far as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.shared.data.lock()).into_owned()
    }

    /// Returns the number of bytes written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.progress.borrow().len
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.progress.borrow().closed
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// An independent cursor over an [`OutputBuffer`].
#[derive(Debug)]
pub struct OutputReader {
    shared: Arc<Shared>,
    pos: usize,
    progress: watch::Receiver<Progress>,
}

impl OutputReader {
    fn attach(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            pos: 0,
            progress: shared.progress.subscribe(),
        }
    }

    /// Reads up to `dst.len()` bytes.
    ///
    /// Waits while caught up and the buffer is open. Returns `0` at
    /// end-of-stream.
    pub async fn read(&mut self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }
        loop {
            // Observe progress before copying: a close seen here was
            // issued after the final write, so an empty copy means EOF.
            let progress = *self.progress.borrow_and_update();
            let n = self.copy_into(dst);
            if n > 0 {
                return n;
            }
            if progress.closed {
                return 0;
            }
            if self.progress.changed().await.is_err() {
                return self.copy_into(dst);
            }
        }
    }

    /// Reads until end-of-stream.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk).await;
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Returns the number of bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn copy_into(&mut self, dst: &mut [u8]) -> usize {
        let data = self.shared.data.lock();
        let available = data.len().saturating_sub(self.pos);
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}
