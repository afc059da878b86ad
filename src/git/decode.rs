use crate::error::ConfigError;
use encoding_rs::{Encoding, UTF_8};

/// Result of decoding one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    /// Name of the encoding that produced `text`
    pub encoding: &'static str,
    /// True when every configured encoding failed and invalid bytes were replaced
    pub lossy: bool,
}

/// Decodes historical blobs by trying a prioritized list of encodings.
///
/// Decoding never fails: when no encoding in the chain accepts the bytes,
/// they are decoded as UTF-8 with U+FFFD replacements.
#[derive(Debug, Clone)]
pub struct TextDecoder {
    chain: Vec<&'static Encoding>,
}

impl TextDecoder {
    pub fn new(chain: Vec<&'static Encoding>) -> Self {
        Self { chain }
    }

    /// Build a decoder from WHATWG labels ("utf-8", "euc-kr", ...)
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, ConfigError> {
        let chain = labels
            .iter()
            .map(|label| {
                Encoding::for_label(label.as_ref().as_bytes()).ok_or_else(|| {
                    ConfigError::InvalidValue {
                        key: "history.encodings".to_string(),
                        reason: format!("unknown encoding label '{}'", label.as_ref()),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(chain))
    }

    pub fn encodings(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.chain.iter().map(|e| e.name())
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.decode_detailed(bytes).text
    }

    pub fn decode_detailed(&self, bytes: &[u8]) -> DecodedText {
        for encoding in &self.chain {
            let decoded = if *encoding == UTF_8 {
                std::str::from_utf8(strip_utf8_bom(bytes))
                    .ok()
                    .map(|s| s.to_string())
            } else {
                encoding
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|cow| cow.into_owned())
            };

            if let Some(text) = decoded {
                return DecodedText {
                    text,
                    encoding: encoding.name(),
                    lossy: false,
                };
            }
        }

        tracing::debug!(
            "No configured encoding accepted {} bytes, decoding lossily",
            bytes.len()
        );
        DecodedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            encoding: UTF_8.name(),
            lossy: true,
        }
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new(vec![
            UTF_8,
            encoding_rs::EUC_KR,
            encoding_rs::WINDOWS_1252,
        ])
    }
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}
