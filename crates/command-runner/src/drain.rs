//! Line-oriented draining of a child's output pipe

use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::logger::{LogSource, Logger};

/// Callback invoked with every raw line, trailing newline included
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Reads one stream until it closes, forwarding each line to an optional
/// callback and then to an optional accumulation buffer
pub struct StreamDrainer<'a> {
    source: LogSource,
    callback: Option<&'a LineCallback>,
    buffer: Option<&'a Mutex<String>>,
    logger: &'a dyn Logger,
}

impl<'a> StreamDrainer<'a> {
    /// Create a drainer that only reads
    pub fn new(source: LogSource, logger: &'a dyn Logger) -> Self {
        Self {
            source,
            callback: None,
            buffer: None,
            logger,
        }
    }

    /// Forward every line to `callback`
    pub fn with_callback(mut self, callback: Option<&'a LineCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Append every line to `buffer`
    pub fn with_buffer(mut self, buffer: &'a Mutex<String>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Drain `reader` until end of stream and return the number of lines seen
    ///
    /// A read error ends the drain early. It is logged as a warning and
    /// otherwise ignored; whatever was read before stays in the buffer.
    pub async fn drain<R>(self, reader: R) -> usize
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        let mut lines = 0;

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    if let Some(callback) = self.callback {
                        callback(&line);
                    }
                    if let Some(buffer) = self.buffer {
                        lock(buffer).push_str(&line);
                    }
                    lines += 1;
                }
                Err(e) => {
                    self.logger.warn(&format!(
                        "{} closed while reading after {} lines: {}",
                        self.source, lines, e
                    ));
                    break;
                }
            }
        }

        lines
    }
}
