/// Incremental UTF-8 decoder for chunked response bodies.
///
/// Network chunks can split a multi-byte character; the incomplete tail is
/// carried into the next chunk instead of being replaced.
#[derive(Debug, Default)]
pub struct Utf8FragmentDecoder {
    pending: Vec<u8>,
}

impl Utf8FragmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text completed by `chunk`, or `None` when nothing is printable yet.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        (!decoded.is_empty()).then_some(decoded)
    }

    /// Flushes a dangling partial character at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_character_is_carried_over() {
        let bytes = "Сон".as_bytes();
        let mut decoder = Utf8FragmentDecoder::new();

        assert_eq!(decoder.push(&bytes[..1]), None);
        assert_eq!(decoder.push(&bytes[1..3]).as_deref(), Some("С"));
        assert_eq!(decoder.push(&bytes[3..]).as_deref(), Some("он"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8FragmentDecoder::new();
        assert_eq!(decoder.push(b"a\xffb").as_deref(), Some("a\u{FFFD}b"));
    }

    #[test]
    fn truncated_tail_is_flushed_lossily() {
        let mut decoder = Utf8FragmentDecoder::new();
        assert_eq!(decoder.push(&"é".as_bytes()[..1]), None);
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
    }
}
