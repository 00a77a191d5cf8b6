//! Line framing
//!
//! Splits the raw byte stream coming off the controller port into `\n`
//! terminated frames. Chunks may end anywhere, including in the middle of a
//! multi-byte UTF-8 sequence, so the partial frame is kept as bytes until its
//! terminator arrives. Frames that are not valid UTF-8 once complete are
//! reported as decode errors rather than patched up.

use super::ProtocolError;

/// Incremental `\n` splitter with a carried-over partial frame
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    partial: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes, untrimmed and
    /// without the terminator.
    ///
    /// Joining the returned frames with `\n` after each, followed by
    /// [`pending`](Self::pending), reproduces the bytes pushed so far.
    pub fn push_raw(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let mut frame = std::mem::take(&mut self.partial);
            frame.extend_from_slice(&rest[..pos]);
            frames.push(frame);
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        frames
    }

    /// Append a chunk and return the complete, trimmed, non-blank lines.
    /// A frame with invalid UTF-8 comes back as [`ProtocolError::Decode`].
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, ProtocolError>> {
        self.push_raw(chunk)
            .into_iter()
            .filter_map(|frame| match String::from_utf8(frame) {
                Ok(text) => {
                    let line = text.trim();
                    (!line.is_empty()).then(|| Ok(line.to_string()))
                }
                Err(e) => Some(Err(ProtocolError::decode(
                    &String::from_utf8_lossy(e.as_bytes()),
                    e.utf8_error().to_string(),
                ))),
            })
            .collect()
    }

    /// Bytes received after the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// Drop any partial frame (used when a session restarts)
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_lines(results: Vec<Result<String, ProtocolError>>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new();
        let lines = ok_lines(framer.push(b"{\"tipo\":\"INICIO_SISTEMA\"}\n"));
        assert_eq!(lines, vec!["{\"tipo\":\"INICIO_SISTEMA\"}"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"evento\":").is_empty());
        assert_eq!(framer.pending(), b"{\"evento\":");
        let lines = ok_lines(framer.push(b"\"VEHICULO_ENTRADA\"}\n{\"ti"));
        assert_eq!(lines, vec!["{\"evento\":\"VEHICULO_ENTRADA\"}"]);
        assert_eq!(framer.pending(), b"{\"ti");
    }

    #[test]
    fn test_crlf_and_blank_lines_are_trimmed() {
        let mut framer = LineFramer::new();
        let lines = ok_lines(framer.push(b"  \r\n\r\nSTATUS OK\r\n\t\n"));
        assert_eq!(lines, vec!["STATUS OK"]);
    }

    #[test]
    fn test_multibyte_character_split() {
        let mut framer = LineFramer::new();
        let text = "{\"interpretacion\":\"vehículo\"}\n".as_bytes();
        // split inside the two-byte 'í'
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(framer.push(&text[..split]).is_empty());
        let lines = ok_lines(framer.push(&text[split..]));
        assert_eq!(lines, vec!["{\"interpretacion\":\"vehículo\"}"]);
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let mut framer = LineFramer::new();
        let results = framer.push(b"{\"tipo\":\"A\xFFB\"}\nSTATUS OK\n");
        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(ProtocolError::Decode { line, .. }) => {
                assert!(line.contains('\u{FFFD}'), "{}", line)
            }
            other => panic!("expected decode error, got {:?}", other),
        }
        assert_eq!(results[1].as_deref().unwrap(), "STATUS OK");
    }

    #[test]
    fn test_raw_frames_keep_whitespace() {
        let mut framer = LineFramer::new();
        let frames = framer.push_raw(b" a \n\nb");
        assert_eq!(frames, vec![b" a ".to_vec(), Vec::new()]);
        assert_eq!(framer.pending(), b"b");
        framer.clear();
        assert!(framer.pending().is_empty());
    }
}
