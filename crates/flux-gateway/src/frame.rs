//! Newline-delimited framing for the client byte stream.
//!
//! Both command lines and upload blocks end at the next `\n`. An upload
//! payload therefore cannot contain a newline byte; that is a property of the
//! wire protocol and is kept as-is.

use bytes::Bytes;
use flux_core::FrameError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Reads one logical unit at a time from the inbound half of a connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_frame_bytes,
        }
    }

    /// Next command line, delimiter stripped and whitespace trimmed.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. `Ok(None)` means the
    /// peer closed the stream.
    pub async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        Ok(self
            .read_unit()
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).trim().to_string()))
    }

    /// Next raw block, with only the trailing `\n` removed.
    pub async fn read_block(&mut self) -> Result<Option<Bytes>, FrameError> {
        Ok(self.read_unit().await?.map(Bytes::from))
    }

    /// Bytes up to (not including) the next `\n`.
    ///
    /// End of stream before a delimiter discards the partial unit.
    async fn read_unit(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut unit = Vec::new();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !unit.is_empty() {
                    tracing::debug!(bytes = unit.len(), "discarding unterminated frame at EOF");
                }
                return Ok(None);
            }

            let (take, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i, true),
                None => (available.len(), false),
            };
            if unit.len() + take > self.max_frame_bytes {
                return Err(FrameError::TooLong {
                    limit: self.max_frame_bytes,
                });
            }
            unit.extend_from_slice(&available[..take]);
            self.inner.consume(if done { take + 1 } else { take });

            if done {
                return Ok(Some(unit));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn reader(input: &'static [u8]) -> FrameReader<&'static [u8]> {
        FrameReader::new(input, 1024)
    }

    #[tokio::test]
    async fn lines_are_trimmed() {
        let mut r = reader(b"  hello \r\nworld\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("world"));
        assert_eq!(r.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn block_keeps_inner_whitespace() {
        let mut r = reader(b"UPLOAD:a\n  raw\tbytes \r\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("UPLOAD:a"));
        let block = r.read_block().await.unwrap().unwrap();
        assert_eq!(&block[..], b"  raw\tbytes \r");
    }

    #[tokio::test]
    async fn empty_line_and_empty_block() {
        let mut r = reader(b"\n\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(r.read_block().await.unwrap().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn partial_unit_at_eof_is_discarded() {
        let mut r = reader(b"complete\npartial");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("complete"));
        assert_eq!(r.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mut r = reader(b"caf\xff\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("caf\u{fffd}"));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut r = FrameReader::new(&b"0123456789\n"[..], 4);
        let err = r.read_line().await.unwrap_err();
        assert!(matches!(err, FrameError::TooLong { limit: 4 }));
    }

    #[tokio::test]
    async fn frame_at_limit_is_accepted() {
        let mut r = FrameReader::new(&b"abcd\n"[..], 4);
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn units_spanning_many_reads_are_joined() {
        let (mut client, server) = tokio::io::duplex(8);
        let mut r = FrameReader::new(server, 1024);
        let writer = tokio::spawn(async move {
            for chunk in [&b"he"[..], b"llo wo", b"rld\nnext", b"\n"] {
                client.write_all(chunk).await.unwrap();
            }
        });
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("hello world"));
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("next"));
        writer.await.unwrap();
    }
}
