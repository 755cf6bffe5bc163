//! Reply writing
//!
//! Single-line replies go out as `<text>CRLF`. Multi-line replies carry a
//! status line followed by a dot-stuffed payload: payload lines are
//! LF-separated when built, emitted with CRLF endings, a leading `.` is
//! doubled, and the block ends with a lone `.` line (RFC 3977 §3.1.1).

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const CRLF: &[u8] = b"\r\n";

/// Terminator for multi-line blocks
pub const DOT_TERMINATOR: &[u8] = b".\r\n";

/// Write a single-line reply
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(CRLF).await?;
    writer.flush().await
}

/// Write a status line followed by a dot-stuffed, dot-terminated payload
///
/// `payload` holds LF-separated lines (a trailing LF does not produce an
/// extra empty line); interior blank lines are preserved.
pub async fn write_multiline<W>(writer: &mut W, status: &str, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(status.as_bytes()).await?;
    writer.write_all(CRLF).await?;
    writer.write_all(&dot_stuff(payload)).await?;
    writer.flush().await
}

/// Transform an LF-separated payload into its on-the-wire form
pub fn dot_stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + DOT_TERMINATOR.len());
    let trimmed = payload.strip_suffix(b"\n").unwrap_or(payload);
    if !trimmed.is_empty() {
        for mut line in trimmed.split(|&b| b == b'\n') {
            // Tolerate payloads that already carry CRLF endings.
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(CRLF);
        }
    }
    out.extend_from_slice(DOT_TERMINATOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_just_the_terminator() {
        assert_eq!(dot_stuff(b""), b".\r\n");
    }

    #[test]
    fn test_lines_get_crlf_endings() {
        assert_eq!(dot_stuff(b"one\ntwo\n"), b"one\r\ntwo\r\n.\r\n");
        // Missing trailing LF behaves the same.
        assert_eq!(dot_stuff(b"one\ntwo"), b"one\r\ntwo\r\n.\r\n");
    }

    #[test]
    fn test_leading_dot_is_doubled() {
        assert_eq!(dot_stuff(b".hidden\n"), b"..hidden\r\n.\r\n");
        assert_eq!(dot_stuff(b"a.b\n"), b"a.b\r\n.\r\n");
    }

    #[test]
    fn test_interior_blank_lines_are_preserved() {
        assert_eq!(
            dot_stuff(b"header\n\nbody\n"),
            b"header\r\n\r\nbody\r\n.\r\n"
        );
    }

    #[test]
    fn test_existing_crlf_is_not_doubled() {
        assert_eq!(dot_stuff(b"one\r\ntwo\r\n"), b"one\r\ntwo\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_write_multiline_frames_status_and_payload() {
        let mut buf = Vec::new();
        write_multiline(&mut buf, "101 Capability list:", b"READER\nVERSION\n")
            .await
            .unwrap();
        assert_eq!(buf, b"101 Capability list:\r\nREADER\r\nVERSION\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mut buf = Vec::new();
        write_line(&mut buf, "205 Connection closing").await.unwrap();
        assert_eq!(buf, b"205 Connection closing\r\n");
    }
}
