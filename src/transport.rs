//! Line transport
//!
//! Owns the TCP socket and frames the byte stream into newline-terminated
//! records through [`RecordCodec`]. It never looks inside a record.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace, warn};

use crate::error::{ClientQueryError, Result};

/// Longest record accepted; a full `clientlist` on a busy server stays well below
pub const MAX_RECORD_LENGTH: usize = 1024 * 1024;

/// Frames ClientQuery records on `\n`
///
/// Records are trimmed (which drops the `\r` of `\r\n`), decoded as lossy
/// UTF-8, and blank ones are skipped. Oversized records are discarded up
/// to their terminator instead of failing the connection.
#[derive(Debug)]
pub struct RecordCodec {
    max_length: usize,
    /// Discarding the tail of an oversized record
    skipping: bool,
}

impl RecordCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            skipping: false,
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(MAX_RECORD_LENGTH)
    }
}

impl Decoder for RecordCodec {
    type Item = String;
    type Error = ClientQueryError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_length {
                    warn!(bytes = src.len(), "discarding oversized partial record");
                    src.clear();
                    self.skipping = true;
                }
                return Ok(None);
            };

            let line = src.split_to(pos + 1);
            if std::mem::take(&mut self.skipping) {
                debug!("finished skipping oversized record");
                continue;
            }
            if pos > self.max_length {
                warn!(bytes = pos, "skipped oversized record");
                continue;
            }

            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let record = self.decode(src)?;
        if record.is_none() && !src.is_empty() {
            trace!(bytes = src.len(), "dropping unterminated tail at eof");
            src.clear();
        }
        Ok(record)
    }
}

impl<T: AsRef<str>> Encoder<T> for RecordCodec {
    type Error = ClientQueryError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let text = item.as_ref();
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Newline-framed TCP connection
#[derive(Debug)]
pub struct LineTransport {
    framed: Framed<TcpStream, RecordCodec>,
}

impl LineTransport {
    /// Open a connection, giving up after `connect_timeout`
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        debug!("Connecting to {}", addr);

        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientQueryError::ConnectionFailure {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ClientQueryError::ConnectionFailure {
                    addr,
                    reason: "connect timed out".to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, RecordCodec::default()),
        }
    }

    /// Discard greeting lines until the peer stays quiet for `quiet`
    pub async fn drain_banner(&mut self, quiet: Duration) -> Result<()> {
        while let Some(line) = self.read_line(quiet).await? {
            trace!("banner: {}", line);
        }
        Ok(())
    }

    /// Next non-empty line, or `None` if nothing arrived within `wait`
    pub async fn read_line(&mut self, wait: Duration) -> Result<Option<String>> {
        match timeout(wait, self.framed.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(ClientQueryError::ConnectionClosed),
            Ok(Some(record)) => record.map(Some),
        }
    }

    /// Write `text` followed by a single newline
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        self.framed.send(text).await
    }

    /// Close the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}
