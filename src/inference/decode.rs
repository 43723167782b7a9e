//! Incremental UTF-8 assembly
//!
//! Byte-level tokenizers can split a single character across several tokens.
//! `Utf8Buffer` holds the incomplete tail until the rest of the character
//! arrives and only ever releases whole characters.

#[derive(Debug, Default)]
pub struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the bytes of one token and return the text that became complete
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                let text = s.to_string();
                self.pending.clear();
                text
            }
            Err(e) => {
                let valid_len = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid_len]).into_owned();

                match e.error_len() {
                    // Incomplete trailing sequence, keep it for the next token
                    None => {
                        self.pending.drain(..valid_len);
                        text
                    }
                    // Bytes that can never become valid: replace and move on
                    Some(bad) => {
                        let rest = self.pending.split_off(valid_len + bad);
                        self.pending = Vec::new();
                        let mut text = text;
                        text.push(char::REPLACEMENT_CHARACTER);
                        text.push_str(&self.push(&rest));
                        text
                    }
                }
            }
        }
    }

    /// Release whatever is still pending; an unfinished character becomes U+FFFD
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    /// Number of bytes waiting for the rest of a character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
