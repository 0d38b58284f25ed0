use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::DecodingKey;
use thiserror::Error;

/// Errors that can occur while parsing a client's public key
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Public key is empty")]
    Empty,
    #[error("Public key is not a PEM document")]
    InvalidEncoding,
    #[error("Public key is not a well-formed PKCS#1 RSA key")]
    Malformed,
    #[error("Unsupported PEM block: {0}")]
    Unsupported(String),
    #[error("Invalid public key: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Algorithm family of a parsed public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
    Ed,
}

/// A public key usable to verify the assertions a client signs
#[derive(Clone)]
pub struct PublicKey {
    pub kind: KeyKind,
    pub key: DecodingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kind", &self.kind).finish()
    }
}

/// Label of the first PEM block, e.g. `PUBLIC KEY`
fn pem_label(text: &str) -> Option<&str> {
    let rest = text.trim_start().strip_prefix("-----BEGIN ")?;
    let (label, _) = rest.split_once("-----")?;
    Some(label)
}

/// Base64 body of the first PEM block, without its header lines
fn pem_body(text: &str) -> Option<Vec<u8>> {
    let body: String = text
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN "))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END "))
        .filter(|line| !line.contains(':'))
        .collect();
    STANDARD.decode(body).ok()
}

/// Splits a DER element with the given tag into its content and the bytes after it
fn der_element(der: &[u8], tag: u8) -> Option<(&[u8], &[u8])> {
    let (&first, rest) = der.split_first()?;
    if first != tag {
        return None;
    }
    let (&len_byte, rest) = rest.split_first()?;
    let (len, rest) = if len_byte < 0x80 {
        (len_byte as usize, rest)
    } else {
        let width = (len_byte & 0x7f) as usize;
        if width == 0 || width > 4 || rest.len() < width {
            return None;
        }
        let (len_bytes, rest) = rest.split_at(width);
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, rest)
    };
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

/// Whether `der` is an `RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }`
fn is_pkcs1_public_key(der: &[u8]) -> bool {
    let positive = |int: &[u8]| int.first().is_some_and(|b| b & 0x80 == 0);
    let Some((sequence, [])) = der_element(der, 0x30) else {
        return false;
    };
    let Some((modulus, rest)) = der_element(sequence, 0x02) else {
        return false;
    };
    let Some((exponent, [])) = der_element(rest, 0x02) else {
        return false;
    };
    positive(modulus) && positive(exponent)
}

/// Parses a PKCS#1 (`RSA PUBLIC KEY`) or PKCS#8 (`PUBLIC KEY`) encoded public key
pub fn parse_public_key_pem(pem: &[u8]) -> Result<PublicKey, KeyError> {
    if pem.iter().all(u8::is_ascii_whitespace) {
        return Err(KeyError::Empty);
    }
    let text = std::str::from_utf8(pem).map_err(|_| KeyError::InvalidEncoding)?;
    let label = pem_label(text).ok_or(KeyError::InvalidEncoding)?;

    match label {
        "RSA PUBLIC KEY" => {
            // DecodingKey only extracts the DER body of PKCS#1 blocks
            let der = pem_body(text).ok_or(KeyError::InvalidEncoding)?;
            if !is_pkcs1_public_key(&der) {
                return Err(KeyError::Malformed);
            }
            Ok(PublicKey {
                kind: KeyKind::Rsa,
                key: DecodingKey::from_rsa_pem(pem)?,
            })
        }
        "PUBLIC KEY" => {
            // The PKCS#8 envelope names the algorithm; try each family in turn
            if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
                return Ok(PublicKey {
                    kind: KeyKind::Rsa,
                    key,
                });
            }
            if let Ok(key) = DecodingKey::from_ec_pem(pem) {
                return Ok(PublicKey {
                    kind: KeyKind::Ec,
                    key,
                });
            }
            Ok(PublicKey {
                kind: KeyKind::Ed,
                key: DecodingKey::from_ed_pem(pem)?,
            })
        }
        other => Err(KeyError::Unsupported(other.to_string())),
    }
}
