//! Newline-delimited JSON transport.
//!
//! Framing for the stdio transport: one UTF-8 JSON-RPC message per line,
//! with no newline inside a message. Requests arrive on stdin and replies
//! leave on stdout. stderr is left to the logger.
//!
//! Reader and writer are separate halves so the server can keep reading
//! while replies are written from a dedicated task. Both are generic over
//! tokio's I/O traits, which lets tests drive them with in-memory pipes.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp::protocol::{JsonRpcReply, OutgoingNotification};

/// Longest accepted message line, in bytes.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Reading half: one JSON message per line.
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if the stream is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails, the line is not UTF-8, or the line
    /// exceeds [`MAX_LINE_BYTES`].
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_LINE_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "message exceeds maximum line length"));
        }

        let mut line = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }
}

/// Writing half.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a response or error envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_reply(&mut self, reply: &JsonRpcReply) -> io::Result<()> {
        self.write_json(reply).await
    }

    /// Writes a server-initiated notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_notification(&mut self, notification: &OutgoingNotification) -> io::Result<()> {
        self.write_json(notification).await
    }

    /// Serialises `value` onto one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_raw(&json).await
    }

    async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "serialised message contains a newline"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Reader over stdin and writer over stdout.
#[must_use]
pub fn stdio() -> (MessageReader<tokio::io::Stdin>, MessageWriter<tokio::io::Stdout>) {
    (
        MessageReader::new(tokio::io::stdin()),
        MessageWriter::new(tokio::io::stdout()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, RequestId};

    #[tokio::test]
    async fn reads_lines_and_strips_crlf() {
        let input: &[u8] = b"{\"a\":1}\r\n\n{\"b\":2}";
        let mut reader = MessageReader::new(input);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_an_error() {
        let input: &[u8] = b"\xff\xfe\n";
        let mut reader = MessageReader::new(input);
        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn writes_one_line_per_message() {
        let mut out = Vec::new();
        {
            let mut writer = MessageWriter::new(&mut out);
            let ok = JsonRpcResponse::success(
                RequestId::Number(1),
                serde_json::json!({"message": "hello world", "nested": {"key": "value"}}),
            );
            writer.write_reply(&ok.into()).await.unwrap();
            let err = JsonRpcError::method_not_found(RequestId::Number(2), "test/method");
            writer.write_reply(&err.into()).await.unwrap();
        }

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""id":1"#));
        assert!(lines[1].contains(r#""code":-32601"#));
    }
}
