//! RS256 signing material
//!
//! A fresh RSA-2048 keypair is generated when the provider mock starts.
//! The public modulus and exponent are published through the JWKS
//! endpoint; tokens are signed with `jsonwebtoken` RS256.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use mockd_core::{Error, Result};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

/// Signing and verification keys plus the JWKS view of the public half.
pub struct SigningKeys {
    pub kid: String,
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    /// Base64url-encoded modulus.
    pub n: String,
    /// Base64url-encoded public exponent.
    pub e: String,
}

impl SigningKeys {
    /// Generate a fresh RSA-2048 keypair.
    pub fn generate() -> Result<Self> {
        let key = RsaPrivateKey::new(&mut rand_core::OsRng, 2048)
            .map_err(|e| Error::validation(format!("RSA key generation failed: {e}")))?;
        let pem = key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| Error::validation(format!("key serialization failed: {e}")))?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::validation(format!("key import failed: {e}")))?;

        let n = URL_SAFE_NO_PAD.encode(key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(key.e().to_bytes_be());
        let decoding = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| Error::validation(format!("public key import failed: {e}")))?;

        Ok(Self { kid: uuid::Uuid::new_v4().simple().to_string(), encoding, decoding, n, e })
    }

    /// JWKS document for the public key.
    pub fn jwks(&self) -> serde_json::Value {
        serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": self.kid,
                "n": self.n,
                "e": self.e,
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn generated_keys_sign_and_verify() {
        let keys = SigningKeys::generate().unwrap();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(keys.kid.clone());
        let token = encode(
            &header,
            &Claims { sub: "tester".to_string(), exp: chrono::Utc::now().timestamp() + 60 },
            &keys.encoding,
        )
        .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let decoded = decode::<Claims>(&token, &keys.decoding, &validation).unwrap();
        assert_eq!(decoded.claims.sub, "tester");
    }

    #[test]
    fn jwks_exposes_components() {
        let keys = SigningKeys::generate().unwrap();
        let jwks = keys.jwks();
        let entry = &jwks["keys"][0];
        assert_eq!(entry["kty"], "RSA");
        assert_eq!(entry["alg"], "RS256");
        assert!(!entry["n"].as_str().unwrap().is_empty());
        // 65537 == AQAB.
        assert_eq!(entry["e"], "AQAB");
    }
}
