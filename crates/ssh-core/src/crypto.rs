use russh::{
    Preferred,
    keys::{Algorithm, HashAlg},
};
use std::borrow::Cow;

/// Algorithm preferences for a session; `legacy` widens the suites for old
/// servers that only speak SHA-1 key exchange and CBC ciphers.
pub fn preferred_algorithms(legacy: bool) -> Preferred {
    if legacy { legacy_preferred() } else { Preferred::DEFAULT.clone() }
}

fn legacy_preferred() -> Preferred {
    Preferred {
        kex: Cow::Owned(vec![
            russh::kex::CURVE25519,
            russh::kex::DH_G14_SHA256,
            russh::kex::DH_G14_SHA1,
            russh::kex::DH_G1_SHA1,
        ]),
        key: Cow::Owned(vec![
            Algorithm::Ed25519,
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha256),
            },
            Algorithm::Rsa { hash: None },
        ]),
        cipher: Cow::Owned(vec![
            russh::cipher::CHACHA20_POLY1305,
            russh::cipher::AES_128_CTR,
            russh::cipher::AES_128_CBC,
        ]),
        mac: Cow::Owned(vec![russh::mac::HMAC_SHA256, russh::mac::HMAC_SHA512, russh::mac::HMAC_SHA1]),
        compression: Preferred::DEFAULT.compression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_suites_keep_modern_algorithms_first() {
        let legacy = preferred_algorithms(true);
        assert_eq!(legacy.kex.first(), Some(&russh::kex::CURVE25519));
        assert!(legacy.cipher.contains(&russh::cipher::AES_128_CBC));
        let modern = preferred_algorithms(false);
        assert!(!modern.cipher.contains(&russh::cipher::AES_128_CBC));
    }
}
