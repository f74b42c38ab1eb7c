use super::{RespParser, RespValue};
use crate::error::FrameError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Result of reading from a connection.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    /// A complete value and the number of bytes it occupied on the wire.
    Frame { value: RespValue, len: usize },
    /// A frame that could not be parsed. Either only its own bytes were
    /// skipped or, if the framing was broken, the whole buffer was discarded.
    Malformed(String),
}

/// "Read the next protocol frame" capability of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn next_frame(&mut self) -> io::Result<Option<Incoming>>;
}

/// Frame reader over any async byte stream.
pub struct FramedReader<R> {
    reader: R,
    parser: RespParser,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: RespParser::new(),
            buffer: vec![0; 4096],
        }
    }

    /// Read more bytes into the parser. Returns false on EOF.
    async fn fill(&mut self) -> io::Result<bool> {
        let n = self.reader.read(&mut self.buffer).await?;
        if n == 0 {
            return Ok(false);
        }
        self.parser.add_data(&self.buffer[..n]);
        Ok(true)
    }

    /// Read the `$<len>\r\n<bytes>` snapshot that follows `+FULLRESYNC`.
    pub async fn read_snapshot_payload(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(payload) = self.parser.take_snapshot_payload()? {
                return Ok(Some(payload));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for FramedReader<R> {
    async fn next_frame(&mut self) -> io::Result<Option<Incoming>> {
        loop {
            match self.parser.parse_frame() {
                Ok(Some((value, len))) => return Ok(Some(Incoming::Frame { value, len })),
                Ok(None) => {}
                Err(FrameError::Invalid(e)) => {
                    warn!("Skipping invalid frame: {}", e);
                    return Ok(Some(Incoming::Malformed(e)));
                }
                Err(FrameError::Corrupt(e)) => {
                    warn!("Protocol error: {}", e);
                    self.parser.reset();
                    return Ok(Some(Incoming::Malformed(e)));
                }
            }

            if !self.fill().await? {
                return Ok(None); // Connection closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPI")
            .read(b"NG\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n")
            .build();
        let mut reader = FramedReader::new(mock);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Frame {
                value: RespValue::bulk_array(["PING"]),
                len: 14
            })
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Frame {
                value: RespValue::bulk_array(["ECHO", "hi"]),
                len: 22
            })
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_input_recovers() {
        let mock = Builder::new()
            .read(b"$-7\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .build();
        let mut reader = FramedReader::new(mock);

        assert!(matches!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Malformed(_))
        ));
        assert!(matches!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Frame { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_frame_keeps_pipelined_commands() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n\xff\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut reader = FramedReader::new(mock);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Malformed("Invalid UTF-8".to_string()))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Incoming::Frame {
                value: RespValue::bulk_array(["PING"]),
                len: 14
            })
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }
}
