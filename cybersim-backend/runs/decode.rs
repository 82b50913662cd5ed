/// Incremental UTF-8 decoder for one output stream.
///
/// A read can end in the middle of a multi-byte sequence; those trailing
/// bytes are held back and prefixed to the next read. Invalid sequences are
/// replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next block of bytes. Returns an empty string when
    /// everything is held back waiting for the rest of a sequence.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"hello\n"), "hello\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_sequence_is_stitched() {
        let bytes = "héllo ✓".as_bytes();
        // Split inside the 3-byte check mark.
        let cut = bytes.len() - 1;
        let mut decoder = StreamDecoder::new();
        let first = decoder.push(&bytes[..cut]);
        let second = decoder.push(&bytes[cut..]);
        assert_eq!(first, "héllo ");
        assert_eq!(second, "✓");
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "añb€c";
        let mut decoder = StreamDecoder::new();
        let mut out = String::new();
        for b in text.as_bytes() {
            out.push_str(&decoder.push(std::slice::from_ref(b)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_sequence_flushed_on_finish() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"ok\xe2\x9c"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
