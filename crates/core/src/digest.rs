//! Content digests in `<algorithm>:<hex>` form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Supported digest algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

/// A validated content digest such as `sha256:e3b0...`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse `<algorithm>:<hex>`, requiring lowercase hex of the right width.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidDigest(format!("missing algorithm: {s}")))?;

        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha384" => Algorithm::Sha384,
            "sha512" => Algorithm::Sha512,
            other => {
                return Err(crate::Error::InvalidDigest(format!(
                    "unsupported algorithm: {other}"
                )));
            }
        };

        if hex.len() != algorithm.hex_len() {
            return Err(crate::Error::InvalidDigest(format!(
                "expected {} hex chars, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }

        if !hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(crate::Error::InvalidDigest(format!(
                "non-hex characters in {s}"
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// SHA-256 digest of `data`.
    pub fn sha256_of(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// Whether `reference` is a digest rather than a tag.
pub fn is_digest(reference: &str) -> bool {
    Digest::parse(reference).is_ok()
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl FromStr for Digest {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_of_empty() {
        assert_eq!(Digest::sha256_of(b"").to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_parse_roundtrip() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(digest.algorithm(), Algorithm::Sha256);
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Digest::parse("latest").is_err());
        assert!(Digest::parse("md5:abcd").is_err());
        assert!(Digest::parse("sha256:abcd").is_err());
        assert!(Digest::parse(&EMPTY_SHA256.to_uppercase().replace("SHA256", "sha256")).is_err());
    }

    #[test]
    fn test_is_digest() {
        assert!(is_digest(EMPTY_SHA256));
        assert!(!is_digest("v1.0"));
    }

    #[test]
    fn test_serde_as_string() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{EMPTY_SHA256}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
