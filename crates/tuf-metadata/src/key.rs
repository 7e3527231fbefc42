//! Public keys, key IDs, and single-signature verification.
//!
//! A key's ID is the hex SHA-256 of its canonical JSON form. The ID is
//! derived once while the key is decoded (or constructed), so every copy of
//! the same key material carries the same ID without any lazily-filled state.

use std::collections::BTreeMap;

use ring::signature::{
    UnparsedPublicKey, VerificationAlgorithm, ECDSA_P256_SHA256_ASN1, ED25519,
    RSA_PSS_2048_8192_SHA256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

use crate::canonical::to_canonical_bytes;
use crate::error::{MetadataError, Result};

pub const KEY_TYPE_ED25519: &str = "ed25519";
pub const KEY_TYPE_ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
/// Key type emitted by securesystemslib for P-256 keys.
pub const KEY_TYPE_ECDSA: &str = "ecdsa";
pub const KEY_TYPE_RSA: &str = "rsa";
pub const SCHEME_ED25519: &str = "ed25519";
pub const SCHEME_ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
pub const SCHEME_RSASSA_PSS_SHA256: &str = "rsassa-pss-sha256";

/// PEM label for SubjectPublicKeyInfo documents.
const PEM_PUBLIC_KEY: &str = "PUBLIC KEY";
/// `id-ecPublicKey`.
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// `rsaEncryption`.
const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// The `keyval` object of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// Public key material: hex for Ed25519, PEM SubjectPublicKeyInfo otherwise.
    pub public: String,
    #[serde(flatten)]
    pub unrecognized_fields: BTreeMap<String, Value>,
}

/// Wire shape of a key, before its ID has been derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeyFields {
    keytype: String,
    scheme: String,
    keyval: KeyVal,
    #[serde(flatten)]
    unrecognized_fields: BTreeMap<String, Value>,
}

/// A public key listed by root or by a delegating targets role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KeyFields", into = "KeyFields")]
pub struct Key {
    fields: KeyFields,
    id: String,
}

impl TryFrom<KeyFields> for Key {
    type Error = MetadataError;

    fn try_from(fields: KeyFields) -> Result<Self> {
        let canonical = to_canonical_bytes(&fields)?;
        let id = hex::encode(Sha256::digest(&canonical));
        Ok(Self { fields, id })
    }
}

impl From<Key> for KeyFields {
    fn from(key: Key) -> Self {
        key.fields
    }
}

impl Key {
    /// Builds a key from its type, scheme and public material.
    pub fn new(
        keytype: impl Into<String>,
        scheme: impl Into<String>,
        public: impl Into<String>,
    ) -> Result<Self> {
        Self::try_from(KeyFields {
            keytype: keytype.into(),
            scheme: scheme.into(),
            keyval: KeyVal {
                public: public.into(),
                unrecognized_fields: BTreeMap::new(),
            },
            unrecognized_fields: BTreeMap::new(),
        })
    }

    /// Builds an Ed25519 key from the raw 32-byte public key.
    pub fn from_ed25519(public: &[u8]) -> Result<Self> {
        Self::new(KEY_TYPE_ED25519, SCHEME_ED25519, hex::encode(public))
    }

    /// Builds an ECDSA P-256 key from a DER SubjectPublicKeyInfo.
    pub fn from_ecdsa_p256_spki_der(der: &[u8]) -> Result<Self> {
        Self::new(
            KEY_TYPE_ECDSA_SHA2_NISTP256,
            SCHEME_ECDSA_SHA2_NISTP256,
            spki_pem(der),
        )
    }

    /// Builds an RSA-PSS key from a DER SubjectPublicKeyInfo.
    pub fn from_rsa_spki_der(der: &[u8]) -> Result<Self> {
        Self::new(KEY_TYPE_RSA, SCHEME_RSASSA_PSS_SHA256, spki_pem(der))
    }

    /// Hex SHA-256 of the key's canonical JSON form.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key_type(&self) -> &str {
        &self.fields.keytype
    }

    pub fn scheme(&self) -> &str {
        &self.fields.scheme
    }

    pub fn public(&self) -> &str {
        &self.fields.keyval.public
    }

    pub fn keyval(&self) -> &KeyVal {
        &self.fields.keyval
    }

    pub fn unrecognized_fields(&self) -> &BTreeMap<String, Value> {
        &self.fields.unrecognized_fields
    }

    /// Decodes the stored key material into a verifier.
    ///
    /// Unsupported type/scheme combinations and undecodable material are
    /// errors, never a silent "does not verify".
    pub fn to_public_key(&self) -> Result<PublicKey> {
        match (self.key_type(), self.scheme()) {
            (KEY_TYPE_ED25519, SCHEME_ED25519) => {
                let bytes = hex::decode(self.public()).map_err(|err| self.crypto(err))?;
                if bytes.len() != 32 {
                    return Err(self.crypto(format!(
                        "ed25519 public key must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                Ok(PublicKey::Ed25519(bytes))
            }
            (KEY_TYPE_ECDSA_SHA2_NISTP256 | KEY_TYPE_ECDSA, SCHEME_ECDSA_SHA2_NISTP256) => {
                let point = self.spki_key_bytes(OID_EC_PUBLIC_KEY)?;
                Ok(PublicKey::EcdsaP256(point))
            }
            (KEY_TYPE_RSA, SCHEME_RSASSA_PSS_SHA256) => {
                let rsa = self.spki_key_bytes(OID_RSA_ENCRYPTION)?;
                Ok(PublicKey::RsaPssSha256(rsa))
            }
            (keytype, scheme) => Err(MetadataError::UnsupportedKey {
                keytype: keytype.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }

    /// Parses the PEM SubjectPublicKeyInfo and returns the embedded key bits.
    fn spki_key_bytes(&self, expected: ObjectIdentifier) -> Result<Vec<u8>> {
        let pem = pem::parse(self.public()).map_err(|err| self.crypto(err))?;
        if pem.tag() != PEM_PUBLIC_KEY {
            return Err(self.crypto(format!("unexpected PEM label '{}'", pem.tag())));
        }
        let spki = SubjectPublicKeyInfoRef::try_from(pem.contents())
            .map_err(|err| self.crypto(err))?;
        if spki.algorithm.oid != expected {
            return Err(self.crypto(format!(
                "unexpected key algorithm {}",
                spki.algorithm.oid
            )));
        }
        Ok(spki.subject_public_key.raw_bytes().to_vec())
    }

    fn crypto(&self, reason: impl ToString) -> MetadataError {
        MetadataError::Crypto {
            keyid: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Decoded public key ready to check signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Raw 32-byte Ed25519 key.
    Ed25519(Vec<u8>),
    /// Uncompressed SEC1 P-256 point; signatures are ASN.1 DER.
    EcdsaP256(Vec<u8>),
    /// PKCS#1 `RSAPublicKey`.
    RsaPssSha256(Vec<u8>),
}

impl PublicKey {
    /// Returns `true` when `signature` is a valid signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let algorithm: &'static dyn VerificationAlgorithm = match self {
            PublicKey::Ed25519(_) => &ED25519,
            PublicKey::EcdsaP256(_) => &ECDSA_P256_SHA256_ASN1,
            PublicKey::RsaPssSha256(_) => &RSA_PSS_2048_8192_SHA256,
        };
        UnparsedPublicKey::new(algorithm, self.as_bytes())
            .verify(message, signature)
            .is_ok()
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Ed25519(bytes)
            | PublicKey::EcdsaP256(bytes)
            | PublicKey::RsaPssSha256(bytes) => bytes,
        }
    }
}

/// PEM-encodes a DER SubjectPublicKeyInfo.
fn spki_pem(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(PEM_PUBLIC_KEY, der.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ED25519_PUBLIC: &str =
        "edcd0a32a07dce33f7c7873aaffbff36d20ea30787574ead335eefd337e4dacd";

    #[test]
    fn key_id_is_sha256_of_canonical_form() {
        let key = Key::new(KEY_TYPE_ED25519, SCHEME_ED25519, ED25519_PUBLIC).unwrap();
        let canonical = format!(
            r#"{{"keytype":"ed25519","keyval":{{"public":"{ED25519_PUBLIC}"}},"scheme":"ed25519"}}"#
        );
        assert_eq!(key.id(), hex::encode(Sha256::digest(canonical.as_bytes())));
    }

    #[test]
    fn key_id_is_stable_across_decoding() {
        let raw = json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": { "public": ED25519_PUBLIC },
        });
        let decoded: Key = serde_json::from_value(raw).unwrap();
        let built = Key::new(KEY_TYPE_ED25519, SCHEME_ED25519, ED25519_PUBLIC).unwrap();
        assert_eq!(decoded.id(), built.id());
        assert_eq!(decoded, built);
    }

    #[test]
    fn unrecognized_fields_change_the_key_id_and_round_trip() {
        let raw = json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": { "public": ED25519_PUBLIC, "x-extra": 1 },
            "x-origin": "hsm",
        });
        let decoded: Key = serde_json::from_value(raw.clone()).unwrap();
        let plain = Key::new(KEY_TYPE_ED25519, SCHEME_ED25519, ED25519_PUBLIC).unwrap();
        assert_ne!(decoded.id(), plain.id());
        assert_eq!(serde_json::to_value(&decoded).unwrap(), raw);
    }

    #[test]
    fn unsupported_key_type_is_an_error() {
        let key = Key::new("dsa", "dsa-sha1", "00").unwrap();
        assert!(matches!(
            key.to_public_key(),
            Err(MetadataError::UnsupportedKey { .. })
        ));
    }

    #[test]
    fn malformed_material_is_a_crypto_error() {
        let ed = Key::new(KEY_TYPE_ED25519, SCHEME_ED25519, "not-hex").unwrap();
        assert!(matches!(ed.to_public_key(), Err(MetadataError::Crypto { .. })));

        let short = Key::new(KEY_TYPE_ED25519, SCHEME_ED25519, "abcd").unwrap();
        assert!(matches!(short.to_public_key(), Err(MetadataError::Crypto { .. })));

        let rsa = Key::new(KEY_TYPE_RSA, SCHEME_RSASSA_PSS_SHA256, "garbage").unwrap();
        assert!(matches!(rsa.to_public_key(), Err(MetadataError::Crypto { .. })));
    }

    #[test]
    fn ecdsa_key_rejects_rsa_spki() {
        // 1024-bit RSA SubjectPublicKeyInfo header followed by filler; only the OID matters here.
        let mut der = hex::decode("30819f300d06092a864886f70d010101050003818d00").unwrap();
        der.extend(std::iter::repeat(0u8).take(140));
        let key = Key::new(
            KEY_TYPE_ECDSA_SHA2_NISTP256,
            SCHEME_ECDSA_SHA2_NISTP256,
            spki_pem(&der),
        )
        .unwrap();
        assert!(matches!(key.to_public_key(), Err(MetadataError::Crypto { .. })));
    }
}
