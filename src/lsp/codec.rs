//! LSP base-protocol framing.
//!
//! Each message on a language server's stdio is wrapped in HTTP-style
//! headers followed by a blank line and an exact-length body:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{...}}
//! ```
//!
//! Only `Content-Length` is interpreted; other headers are skipped. The
//! body is opaque bytes here; JSON validity is the caller's concern.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::LspError;

/// Upper bound on a declared body length. A server announcing more than
/// this is treated as malformed rather than buffered.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Prepends the `Content-Length` header to `body`, producing one wire frame.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Writes one frame as a single buffer so concurrent writers (serialised by
/// the caller's lock) can never interleave header and body bytes.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), LspError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(body)).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, returning the raw body bytes.
///
/// Returns [`LspError::PeerClosed`] on a clean end-of-stream between frames,
/// [`LspError::MalformedHeader`] when `Content-Length` is missing, not a
/// non-negative integer, above [`MAX_FRAME_LEN`], or when the stream ends
/// mid-header, and [`LspError::TruncatedBody`] on a short body read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, LspError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut first_line = true;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if first_line {
                return Err(LspError::PeerClosed);
            }
            return Err(LspError::MalformedHeader(
                "end of stream inside headers".into(),
            ));
        }
        first_line = false;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }

        // Header names are case-insensitive; unknown headers are skipped.
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len: usize = value.trim().parse().map_err(|_| {
                    LspError::MalformedHeader(format!("bad Content-Length: {value:?}"))
                })?;
                if len > MAX_FRAME_LEN {
                    return Err(LspError::MalformedHeader(format!(
                        "Content-Length {len} exceeds maximum {MAX_FRAME_LEN}"
                    )));
                }
                content_length = Some(len);
            }
        }
    }

    let len = content_length
        .ok_or_else(|| LspError::MalformedHeader("missing Content-Length".into()))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            LspError::TruncatedBody
        } else {
            LspError::Io(e)
        }
    })?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn decode(bytes: &[u8]) -> Result<Vec<u8>, LspError> {
        let mut cursor = Cursor::new(bytes.to_vec());
        read_frame(&mut cursor).await
    }

    #[tokio::test]
    async fn encode_then_decode_is_identity() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let frame = encode_frame(body);
        let decoded = decode(&frame).await.unwrap();
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn decode_skips_extra_headers_case_insensitively() {
        let mut raw = b"Content-Type: application/json\r\ncontent-length: 5\r\n\r\nhello".to_vec();
        raw.extend_from_slice(b"trailing-garbage-is-next-frame");
        let decoded = decode(&raw).await.unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[tokio::test]
    async fn decode_rejects_missing_content_length() {
        let err = decode(b"X-Custom: foo\r\n\r\nbody").await.unwrap_err();
        assert!(matches!(err, LspError::MalformedHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn decode_rejects_non_integer_length() {
        let err = decode(b"Content-Length: twelve\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, LspError::MalformedHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn decode_rejects_negative_length() {
        let err = decode(b"Content-Length: -1\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, LspError::MalformedHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn decode_rejects_oversized_length() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_LEN + 1);
        let err = decode(header.as_bytes()).await.unwrap_err();
        assert!(matches!(err, LspError::MalformedHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn decode_reports_truncated_body() {
        let err = decode(b"Content-Length: 100\r\n\r\nshort").await.unwrap_err();
        assert!(matches!(err, LspError::TruncatedBody), "{err}");
    }

    #[tokio::test]
    async fn decode_reports_clean_eof_as_peer_closed() {
        let err = decode(b"").await.unwrap_err();
        assert!(matches!(err, LspError::PeerClosed), "{err}");
    }

    #[tokio::test]
    async fn decode_reports_eof_inside_headers() {
        let err = decode(b"Content-Length: 5\r\n").await.unwrap_err();
        assert!(matches!(err, LspError::MalformedHeader(_)), "{err}");
    }

    #[tokio::test]
    async fn two_frames_back_to_back() {
        let mut raw = encode_frame(b"first");
        raw.extend_from_slice(&encode_frame(b"second"));
        let mut cursor = Cursor::new(raw);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"second");
        assert!(matches!(
            read_frame(&mut cursor).await.unwrap_err(),
            LspError::PeerClosed
        ));
    }

    #[tokio::test]
    async fn bodies_pass_through_utf8_transparently() {
        let body = "{\"text\":\"héllo wörld — ünïcode\"}".as_bytes();
        let decoded = decode(&encode_frame(body)).await.unwrap();
        assert_eq!(decoded, body);
    }
}
