//! Text ⇄ token conversion at the scheduler boundary

/// Pluggable tokenizer. Token ids are opaque to the driver apart from
/// [`llmaccel_chip::EOS_TOKEN`].
pub trait Tokenizer: Send {
    /// Split `text` into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Render one token id.
    fn decode(&self, token: u32) -> String;
}

/// One token per character code. Ids below 128 render as ASCII, anything
/// else as `[T<id>]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, token: u32) -> String {
        match u8::try_from(token) {
            Ok(b) if b.is_ascii() => char::from(b).to_string(),
            _ => format!("[T{token}]"),
        }
    }
}
