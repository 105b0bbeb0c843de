/// Overlay destinations and their canonical short form
///
/// A full destination is the base64 text published in hosts files. Its
/// short form is the SHA-256 of the decoded bytes, base32-encoded, with a
/// `.b32.i2p` suffix. Two destinations are the same service exactly when
/// their short forms match.

use data_encoding::{Encoding, Specification, BASE32_NOPAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Suffix of short-form addresses
pub const B32_SUFFIX: &str = ".b32.i2p";

/// Smallest valid destination: public key, signing key and a null certificate
pub const MIN_DESTINATION_LEN: usize = 387;

const I2P_BASE64_SYMBOLS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~";

/// The overlay's base64 variant: `-` and `~` replace `+` and `/`
pub fn i2p_base64() -> &'static Encoding {
    static ENCODING: OnceLock<Encoding> = OnceLock::new();
    ENCODING.get_or_init(|| {
        let mut spec = Specification::new();
        spec.symbols.push_str(I2P_BASE64_SYMBOLS);
        spec.padding = Some('=');
        spec.check_trailing_bits = false;
        // The alphabet is a constant of 64 distinct symbols
        spec.encoding().expect("valid base64 alphabet")
    })
}

/// A decoded full destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(Vec<u8>);

impl Destination {
    /// Decode base64 destination text
    ///
    /// Anything after a `#` (hosts file extensions) is ignored and missing
    /// padding is tolerated.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let text = text.split('#').next().unwrap_or_default().trim();
        if text.is_empty() {
            return Err(AddressError::Empty);
        }

        let mut padded = text.to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        let bytes = i2p_base64()
            .decode(padded.as_bytes())
            .map_err(|_| AddressError::InvalidEncoding)?;

        if bytes.len() < MIN_DESTINATION_LEN {
            return Err(AddressError::InvalidLength(bytes.len()));
        }

        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        i2p_base64().encode(&self.0)
    }

    /// Short form of this destination
    pub fn to_b32(&self) -> B32Address {
        let digest = Sha256::digest(&self.0);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        B32Address(hash)
    }
}

/// Short-form address, e.g. `abc...xyz.b32.i2p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct B32Address([u8; 32]);

impl B32Address {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to base32 string (without suffix)
    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_lowercase()
    }

    pub fn to_hostname(&self) -> String {
        format!("{}{}", self.to_base32(), B32_SUFFIX)
    }

    /// Parse from hostname (with or without suffix)
    pub fn from_hostname(hostname: &str) -> Result<Self, AddressError> {
        let hostname = hostname.trim().to_lowercase();
        let base32_part = hostname.strip_suffix(B32_SUFFIX).unwrap_or(&hostname);

        let bytes = BASE32_NOPAD
            .decode(base32_part.to_uppercase().as_bytes())
            .map_err(|_| AddressError::InvalidEncoding)?;

        if bytes.len() != 32 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }

        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }

    /// Check if a hostname looks like a short-form address
    pub fn is_b32_address(hostname: &str) -> bool {
        hostname.trim().to_lowercase().ends_with(B32_SUFFIX)
    }
}

impl fmt::Display for B32Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hostname())
    }
}

/// Comparable form of whatever a directory claims for a name
///
/// Full destinations and short forms collapse to their `B32Address`.
/// Anything else is kept as an opaque token, so identical unparseable claims
/// still match each other but never match a real address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalAddress {
    B32(B32Address),
    Opaque(String),
}

impl CanonicalAddress {
    pub fn from_claim(claim: &str) -> Self {
        if B32Address::is_b32_address(claim) {
            if let Ok(address) = B32Address::from_hostname(claim) {
                return Self::B32(address);
            }
        }

        match Destination::parse(claim) {
            Ok(destination) => Self::B32(destination.to_b32()),
            Err(_) => Self::Opaque(claim.trim().to_string()),
        }
    }

    /// Whether the claim decoded to a real address
    pub fn is_address(&self) -> bool {
        matches!(self, Self::B32(_))
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::B32(address) => write!(f, "{}", address),
            Self::Opaque(raw) => write!(f, "{}", raw),
        }
    }
}

/// Address errors
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Empty destination")]
    Empty,

    #[error("Invalid base64/base32 encoding")]
    InvalidEncoding,

    #[error("Invalid address length: {0}")]
    InvalidLength(usize),
}
