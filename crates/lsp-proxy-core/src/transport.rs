//! Length-prefixed JSON-RPC 2.0 framing, identical on the client-facing and
//! server-facing sides of the proxy (spec §4.1).
//!
//! A frame is a header block of `Name: Value` lines terminated by a blank
//! line, of which only `Content-Length` is required, followed by exactly
//! that many UTF-8 JSON bytes.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::TransportError;

/// Marker for anything the framed codec can read from and write to. Both
/// the spawned language server's stdio pipes and an accepted TCP stream
/// satisfy this without any proxy-specific glue.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Reads one `Content-Length`-framed JSON value from `reader`.
///
/// Returns `Ok(None)` on a clean EOF before any header bytes are read, and
/// an error for anything else: an EOF mid-header, a missing or malformed
/// `Content-Length`, or a body that isn't valid UTF-8/JSON.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Value>, TransportError> {
    let mut content_length: Option<usize> = None;
    let mut saw_any_header_byte = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_any_header_byte {
                return Err(TransportError::Header("eof before end of headers".into()));
            }
            return Ok(None);
        }
        saw_any_header_byte = true;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let mut parts = trimmed.splitn(2, ':');
        let name = parts.next().unwrap_or_default().trim();
        let value = parts
            .next()
            .ok_or_else(|| TransportError::Header(format!("malformed header line: {trimmed}")))?
            .trim();

        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| TransportError::Header(format!("bad Content-Length: {value}")))?,
            );
        }
    }

    let length = content_length
        .ok_or_else(|| TransportError::Header("missing Content-Length header".into()))?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    let text = String::from_utf8(body)?;
    let value: Value = serde_json::from_str(&text)?;
    Ok(Some(value))
}

/// Writes one JSON value as a `Content-Length`-framed message.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &Value,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Helper for constructing a buffered reader half over any `Transport`.
pub fn buffered_reader<R: AsyncRead + Unpin>(reader: R) -> BufReader<R> {
    BufReader::new(reader)
}

// `AsyncBufRead` is re-exported so callers of `read_frame` don't need to
// import tokio directly just to name the bound.
pub use tokio::io::AsyncBufRead;
