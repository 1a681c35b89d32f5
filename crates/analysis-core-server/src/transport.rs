//! Newline-delimited JSON framing over the server's stdio.
//!
//! Every message is a single JSON object on its own line:
//!
//! ```text
//! {"id":"1","method":"analysis.setAnalysisRoots","params":{...}}\n
//! ```

use serde_json::Value;
use std::io::{self, BufRead, Write};

/// Write a single message to `writer`, followed by `\n`.
pub fn write_message<W: Write>(writer: &mut W, value: &Value) -> io::Result<()> {
    let mut body =
        serde_json::to_vec(value).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    body.push(b'\n');

    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read a single message from `reader`.
///
/// Returns:
/// - `Ok(Some(value))` when a message is successfully read.
/// - `Ok(None)` on clean EOF (no more messages).
///
/// Blank lines are skipped. Lines that are not valid JSON are reported as
/// [`io::ErrorKind::InvalidData`] together with the offending text; the stream itself stays
/// usable.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Value>> {
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|err| {
            io::Error::new(io::ErrorKind::InvalidData, format!("{err}: {trimmed}"))
        })?;
        return Ok(Some(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn reads_messages_and_skips_blank_lines() {
        let input = "{\"id\":\"1\",\"result\":{}}\n\n{\"event\":\"server.connected\",\"params\":{}}\n";
        let mut reader = Cursor::new(input.as_bytes());

        let first = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(first["id"], "1");
        let second = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(second["event"], "server.connected");
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn garbage_line_is_invalid_data_and_stream_continues() {
        let input = "Observatory listening on http://127.0.0.1\n{\"id\":\"2\",\"result\":null}\n";
        let mut reader = Cursor::new(input.as_bytes());

        let err = read_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let next = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(next["id"], "2");
    }

    #[test]
    fn written_message_is_one_line() {
        let mut out = Vec::new();
        write_message(&mut out, &json!({"id": "3", "method": "server.shutdown"})).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }
}
