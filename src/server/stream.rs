//! Record stream with explicit peek/drop flow control

use tokio::sync::mpsc;

use super::ServerError;

/// One chunk of capture data, or the error that ended the stream
pub type Fragment = Result<Vec<u8>, ServerError>;

/// Incoming capture data
///
/// Data is exposed through [`peek`](Self::peek) and must be acknowledged with
/// [`drop_fragment`](Self::drop_fragment). The next fragment is not taken
/// from the server side until the current one has been dropped completely,
/// so a slow consumer leaves data queued at the server.
pub struct RecordStream {
    fragments: mpsc::Receiver<Fragment>,
    current: Vec<u8>,
    /// Bytes of `current` already acknowledged
    consumed: usize,
}

impl RecordStream {
    /// Create a stream together with the sender that feeds it
    ///
    /// At most `capacity` fragments wait between the producer and the
    /// consumer. Dropping the sender ends the stream.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Fragment>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stream = Self {
            fragments: rx,
            current: Vec::new(),
            consumed: 0,
        };
        (tx, stream)
    }

    /// Wait until data is available, returning the number of buffered bytes
    pub async fn readable(&mut self) -> Result<usize, ServerError> {
        while self.peek().is_empty() {
            match self.fragments.recv().await {
                Some(Ok(data)) => {
                    self.current = data;
                    self.consumed = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Err(ServerError::EndOfStream),
            }
        }
        Ok(self.peek().len())
    }

    /// Currently buffered, unacknowledged data
    pub fn peek(&self) -> &[u8] {
        &self.current[self.consumed..]
    }

    /// Acknowledge `len` bytes of the buffered fragment
    pub fn drop_fragment(&mut self, len: usize) {
        self.consumed = (self.consumed + len).min(self.current.len());
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("buffered", &self.peek().len())
            .field("closed", &self.fragments.is_closed())
            .finish()
    }
}
