//! Ed25519 verification of custody callbacks.
//!
//! The provider signs `body|timestamp`. Its public key is configured as hex and
//! the signature arrives base64 encoded in the `Biz-Resp-Signature` header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Message the provider signs
pub fn signed_payload(body: &str, timestamp: &str) -> String {
    format!("{}|{}", body, timestamp)
}

/// Verify an Ed25519 signature.
///
/// Returns `false` for malformed keys or signatures rather than an error.
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let pk_bytes: [u8; 32] = match public_key.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };

    let sig_bytes: [u8; 64] = match signature.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };

    let verifying_key = match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };

    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &sig).is_ok()
}

/// Callback verifier holding the configured provider key
#[derive(Clone)]
pub struct CallbackVerifier {
    public_key: Vec<u8>,
}

impl CallbackVerifier {
    pub fn from_hex(public_key_hex: &str) -> Result<Self, String> {
        let public_key =
            hex::decode(public_key_hex.trim()).map_err(|e| format!("invalid public key hex: {}", e))?;
        if public_key.len() != 32 {
            return Err(format!(
                "public key must be 32 bytes, got {}",
                public_key.len()
            ));
        }
        Ok(Self { public_key })
    }

    /// Check `signature_b64` over `body|timestamp`
    pub fn verify(&self, body: &str, timestamp: &str, signature_b64: &str) -> bool {
        let Ok(signature) = BASE64.decode(signature_b64.trim()) else {
            return false;
        };
        verify_ed25519(
            &self.public_key,
            signed_payload(body, timestamp).as_bytes(),
            &signature,
        )
    }
}

/// Generate a new Ed25519 keypair for testing.
///
/// Returns (private_key_bytes, public_key_bytes).
#[cfg(any(test, feature = "mock-api"))]
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
}

/// Sign `body|timestamp` the way the provider does, base64 encoded
#[cfg(any(test, feature = "mock-api"))]
pub fn sign_callback(private_key: &[u8; 32], body: &str, timestamp: &str) -> String {
    use ed25519_dalek::{Signer, SigningKey};

    let signing_key = SigningKey::from_bytes(private_key);
    let signature = signing_key.sign(signed_payload(body, timestamp).as_bytes());
    BASE64.encode(signature.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> ([u8; 32], CallbackVerifier) {
        let (private_key, public_key) = generate_keypair();
        let verifier = CallbackVerifier::from_hex(&hex::encode(public_key)).unwrap();
        (private_key, verifier)
    }

    #[test]
    fn test_valid_callback_signature() {
        let (private_key, verifier) = verifier();
        let body = r#"{"id":"1","status":"success"}"#;
        let sig = sign_callback(&private_key, body, "1700000000000");

        assert!(verifier.verify(body, "1700000000000", &sig));
    }

    #[test]
    fn test_tampered_body_or_timestamp() {
        let (private_key, verifier) = verifier();
        let body = r#"{"id":"1","amount":"100"}"#;
        let sig = sign_callback(&private_key, body, "1700000000000");

        assert!(!verifier.verify(r#"{"id":"1","amount":"900"}"#, "1700000000000", &sig));
        assert!(!verifier.verify(body, "1700000000001", &sig));
    }

    #[test]
    fn test_wrong_key() {
        let (private_key, _) = verifier();
        let (_, other) = verifier();
        let sig = sign_callback(&private_key, "{}", "1");
        assert!(!other.verify("{}", "1", &sig));
    }

    #[test]
    fn test_malformed_inputs() {
        let (_, verifier) = verifier();
        assert!(!verifier.verify("{}", "1", "not base64!"));
        assert!(!verifier.verify("{}", "1", &BASE64.encode([0u8; 32])));

        assert!(CallbackVerifier::from_hex("zz").is_err());
        assert!(CallbackVerifier::from_hex(&hex::encode([1u8; 16])).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let signature = [0u8; 64];
        assert!(!verify_ed25519(&[0u8; 16], b"Hello", &signature));
        assert!(!verify_ed25519(&[0u8; 64], b"Hello", &signature));
    }
}
