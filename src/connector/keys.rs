//! Key encodings for backends that store keys as bytes.

use std::fmt;
use std::str::FromStr;

use crate::error::{PreserveError, Result};

/// Text encoding applied to keys before they reach a byte-keyed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16, little-endian, no BOM.
    Utf16Le,
    /// UTF-16, big-endian, no BOM.
    Utf16Be,
    /// ISO-8859-1. Only code points up to U+00FF are encodable.
    Latin1,
}

impl KeyEncoding {
    /// Canonical parameter spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Latin1 => "latin-1",
        }
    }

    /// Encodes a key.
    ///
    /// # Errors
    /// - `Serialization` if the key has characters the encoding cannot hold.
    pub fn encode(self, key: &str) -> Result<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(key.as_bytes().to_vec()),
            Self::Utf16Le => Ok(key.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Utf16Be => Ok(key.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Self::Latin1 => key
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        PreserveError::serialization(format!(
                            "key {key:?} is not encodable as {self}"
                        ))
                    })
                })
                .collect(),
        }
    }

    /// Decodes a stored key.
    ///
    /// # Errors
    /// - `Serialization` if the bytes are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| PreserveError::serialization_with("stored key is not UTF-8", e)),
            Self::Utf16Le | Self::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(PreserveError::serialization(format!(
                        "stored key has odd length for {self}"
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let pair = [pair[0], pair[1]];
                        if self == Self::Utf16Le {
                            u16::from_le_bytes(pair)
                        } else {
                            u16::from_be_bytes(pair)
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|e| {
                    PreserveError::serialization_with(format!("stored key is not {self}"), e)
                })
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for KeyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf-16-le" | "utf16le" => Ok(Self::Utf16Le),
            "utf-16be" | "utf-16-be" | "utf16be" => Ok(Self::Utf16Be),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            _ => Err(format!("unsupported key encoding '{s}'")),
        }
    }
}
