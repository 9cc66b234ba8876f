//! Optional verifiable-credential envelope for commits: a compact JWS signed
//! with an ES256K-R (secp256k1, recoverable) key tied to the commit's `issuer`
//! (spec §4.4 step 6, SPEC_FULL "Credential envelope verification").
//!
//! This is never required — the commit writer/loader treat an absent envelope
//! as "unsigned" and proceed; only a present-but-invalid signature is fatal
//! (spec §4.4 "Failure semantics": "Signature verification failure -> fatal").

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{DbError, Result};

const JWS_HEADER: &str = r#"{"alg":"ES256K-R","typ":"JWT"}"#;

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn signing_input(payload_json: &str) -> String {
    format!("{}.{}", b64(JWS_HEADER.as_bytes()), b64(payload_json.as_bytes()))
}

/// The digest ES256K-R signs over: SHA-256 of the JWS signing input
/// (`base64url(header).base64url(payload)`), mirroring JWT's ES256K convention.
fn signing_digest(input: &str) -> Result<Message> {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    Message::from_digest_slice(&digest)
        .map_err(|e| DbError::credential(format!("invalid digest: {e}")))
}

/// Signs commit JSON into a compact ES256K-R JWS.
pub trait CredentialSigner: Send + Sync {
    fn sign(&self, payload_json: &str) -> Result<String>;
}

/// Verifies a compact ES256K-R JWS against an expected signer identity.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, jws: &str) -> Result<String>;
}

/// A `secp256k1`-backed signer/verifier pair, keyed by a did-key's secret key
/// (spec §4.4: "per the did-key associated with the issuer").
pub struct Secp256k1Signer {
    secret_key: SecretKey,
}

impl Secp256k1Signer {
    pub fn new(secret_key: SecretKey) -> Self {
        Self { secret_key }
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &self.secret_key)
    }
}

impl CredentialSigner for Secp256k1Signer {
    fn sign(&self, payload_json: &str) -> Result<String> {
        let secp = Secp256k1::new();
        let input = signing_input(payload_json);
        let digest = signing_digest(&input)?;
        let sig: RecoverableSignature = secp.sign_ecdsa_recoverable(&digest, &self.secret_key);
        let (recovery_id, bytes) = sig.serialize_compact();
        let mut encoded = bytes.to_vec();
        encoded.push(recovery_id.to_i32() as u8);
        Ok(format!("{input}.{}", b64(&encoded)))
    }
}

/// Verify a compact JWS against an expected public key, returning the payload
/// JSON on success.
pub fn verify_with_public_key(jws: &str, expected: &PublicKey) -> Result<String> {
    let mut parts = jws.splitn(3, '.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(DbError::credential("malformed JWS: expected 3 segments"));
    };

    let input = format!("{header_b64}.{payload_b64}");
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|e| DbError::credential(format!("invalid base64 signature: {e}")))?;
    if sig_bytes.len() != 65 {
        return Err(DbError::credential("invalid recoverable signature length"));
    }
    let recovery_id = RecoveryId::from_i32(sig_bytes[64] as i32)
        .map_err(|e| DbError::credential(format!("invalid recovery id: {e}")))?;
    let sig = RecoverableSignature::from_compact(&sig_bytes[..64], recovery_id)
        .map_err(|e| DbError::credential(format!("invalid signature bytes: {e}")))?;

    let digest = signing_digest(&input)?;
    let secp = Secp256k1::new();
    let recovered = secp
        .recover_ecdsa(&digest, &sig)
        .map_err(|e| DbError::credential(format!("signature recovery failed: {e}")))?;
    if &recovered != expected {
        return Err(DbError::credential("recovered key does not match expected issuer"));
    }
    secp.verify_ecdsa(&digest, &sig.to_standard(), expected)
        .map_err(|e| DbError::credential(format!("signature verification failed: {e}")))?;
    tracing::debug!("commit credential signature verified");

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| DbError::credential(format!("invalid base64 payload: {e}")))?;
    String::from_utf8(payload_bytes)
        .map_err(|e| DbError::credential(format!("payload is not valid UTF-8: {e}")))
}

/// A [`CredentialVerifier`] bound to a single known issuer public key.
pub struct PublicKeyVerifier(pub PublicKey);

impl CredentialVerifier for PublicKeyVerifier {
    fn verify(&self, jws: &str) -> Result<String> {
        verify_with_public_key(jws, &self.0)
    }
}
