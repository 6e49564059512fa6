//! Crypto provider: security policies, key derivation, signatures, AEAD
//!
//! One provider instance serves one security policy. Symmetric protection
//! uses keyed BLAKE3 signatures and ChaCha20-Poly1305 encryption with keys
//! derived from the client and server nonces via HKDF-SHA256. Asymmetric
//! protection of OPN chunks uses Ed25519 signatures and an X25519 sealed
//! box.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};

use uamesh_core::Status;

/// Policy URI for unprotected channels
pub const POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

/// Policy URI for the ChaCha20-Poly1305 / BLAKE3 / X25519 suite
pub const POLICY_CHACHA20_URI: &str = "urn:uamesh:securitypolicy#chacha20poly1305-blake3";

/// Bytes of nonce exchanged in OPN for key derivation
pub const SECURE_CHANNEL_NONCE_LENGTH: usize = 32;

/// Keyed-hash signature length
pub const SYMMETRIC_SIGNATURE_SIZE: usize = 32;

/// AEAD tag appended by encryption
pub const AEAD_TAG_SIZE: usize = 16;

/// Ed25519 signature length
pub const ASYMMETRIC_SIGNATURE_SIZE: usize = 64;

/// Ephemeral public key prepended by the sealed box
pub const SEAL_OVERHEAD: usize = 32 + AEAD_TAG_SIZE;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown security policy: {0}")]
    UnknownPolicy(String),
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed")]
    DecryptionFailed,
    #[error("key derivation failed")]
    KeyDerivationFailed,
    #[error("operation requires a security policy")]
    NoPolicy,
}

impl From<CryptoError> for Status {
    fn from(err: CryptoError) -> Status {
        match err {
            CryptoError::SignatureVerificationFailed | CryptoError::DecryptionFailed => {
                Status::InvalidReceivedParameter
            }
            CryptoError::UnknownPolicy(_) | CryptoError::NoPolicy => Status::InvalidParameters,
            _ => Status::GenericFailure,
        }
    }
}

/// Security policy negotiated per channel or per PubSub group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    None,
    ChaCha20Poly1305,
}

impl SecurityPolicy {
    pub fn uri(self) -> &'static str {
        match self {
            SecurityPolicy::None => POLICY_NONE_URI,
            SecurityPolicy::ChaCha20Poly1305 => POLICY_CHACHA20_URI,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, CryptoError> {
        match uri {
            POLICY_NONE_URI => Ok(SecurityPolicy::None),
            POLICY_CHACHA20_URI => Ok(SecurityPolicy::ChaCha20Poly1305),
            other => Err(CryptoError::UnknownPolicy(other.to_owned())),
        }
    }
}

/// Symmetric keys of one direction: signing key, encryption key and the
/// base init vector the AEAD nonce is derived from
#[derive(Clone)]
pub struct SymmetricKeySet {
    pub sign_key: [u8; 32],
    pub encrypt_key: [u8; 32],
    pub init_vector: [u8; 12],
}

impl std::fmt::Debug for SymmetricKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.write_str("SymmetricKeySet(..)")
    }
}

/// Sender and receiver key sets derived from one OPN exchange
#[derive(Debug, Clone)]
pub struct KeySetPair {
    pub sender: SymmetricKeySet,
    pub receiver: SymmetricKeySet,
}

/// Long-term identity: Ed25519 signing key plus X25519 agreement key
pub struct AsymmetricKey {
    signing: SigningKey,
    agreement: StaticSecret,
}

impl AsymmetricKey {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            agreement: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Deterministic key for tests
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut agreement_seed = *seed;
        agreement_seed[0] ^= 0xAA;
        Self {
            signing: SigningKey::from_bytes(seed),
            agreement: StaticSecret::from(agreement_seed),
        }
    }

    pub fn certificate(&self) -> Certificate {
        Certificate {
            signing: self.signing.verifying_key().to_bytes(),
            agreement: X25519Public::from(&self.agreement).to_bytes(),
        }
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing.sign(data).to_bytes()
    }

    /// Open a sealed box addressed to this identity
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::DecryptionFailed);
        }
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&sealed[..32]);
        let shared = self.agreement.diffie_hellman(&X25519Public::from(ephemeral));
        let key = seal_key(shared.as_bytes(), &ephemeral)?;
        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
        cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), &sealed[32..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Public identity exchanged in the asymmetric security header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Certificate {
    pub signing: [u8; 32],
    pub agreement: [u8; 32],
}

impl Certificate {
    pub const ENCODED_LENGTH: usize = 64;

    pub fn to_bytes(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.signing);
        out[32..].copy_from_slice(&self.agreement);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != Self::ENCODED_LENGTH {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut signing = [0u8; 32];
        let mut agreement = [0u8; 32];
        signing.copy_from_slice(&bytes[..32]);
        agreement.copy_from_slice(&bytes[32..]);
        Ok(Self { signing, agreement })
    }

    /// BLAKE3 digest of the encoded certificate
    pub fn thumbprint(&self) -> [u8; 32] {
        *blake3::hash(&self.to_bytes()).as_bytes()
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(&self.signing)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let signature: &[u8; 64] = signature
            .try_into()
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;
        key.verify(data, &Signature::from_bytes(signature))
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Seal a payload so only the certificate holder can open it
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519Public::from(&ephemeral_secret).to_bytes();
        let shared = ephemeral_secret.diffie_hellman(&X25519Public::from(self.agreement));
        let key = seal_key(shared.as_bytes(), &ephemeral_public)?;
        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
        let mut out = ephemeral_public.to_vec();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

fn seal_key(shared: &[u8; 32], ephemeral_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_public), shared);
    let mut key = [0u8; 32];
    hkdf.expand(b"uamesh-seal", &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(key)
}

/// Policy-bound provider used by the secure channel and the UADP codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoProvider {
    policy: SecurityPolicy,
}

impl CryptoProvider {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn from_uri(uri: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(SecurityPolicy::from_uri(uri)?))
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Secure random nonce sized for the policy; empty under policy None
    pub fn generate_nonce(&self) -> Vec<u8> {
        match self.policy {
            SecurityPolicy::None => Vec::new(),
            SecurityPolicy::ChaCha20Poly1305 => {
                let mut nonce = vec![0u8; SECURE_CHANNEL_NONCE_LENGTH];
                OsRng.fill_bytes(&mut nonce);
                nonce
            }
        }
    }

    pub fn signature_size(&self) -> usize {
        match self.policy {
            SecurityPolicy::None => 0,
            SecurityPolicy::ChaCha20Poly1305 => SYMMETRIC_SIGNATURE_SIZE,
        }
    }

    pub fn encryption_overhead(&self) -> usize {
        match self.policy {
            SecurityPolicy::None => 0,
            SecurityPolicy::ChaCha20Poly1305 => AEAD_TAG_SIZE,
        }
    }

    /// Derive client-side sender and receiver key sets from the two nonces
    pub fn derive_key_sets_client(
        &self,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> Result<KeySetPair, CryptoError> {
        if self.policy == SecurityPolicy::None {
            return Err(CryptoError::NoPolicy);
        }
        // Sender keys come from the server nonce as salt, receiver keys
        // from the client nonce, matching the server's opposite view
        let sender = derive_key_set(server_nonce, client_nonce, b"client-to-server")?;
        let receiver = derive_key_set(client_nonce, server_nonce, b"server-to-client")?;
        Ok(KeySetPair { sender, receiver })
    }

    /// Server-side view of the same derivation
    pub fn derive_key_sets_server(
        &self,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> Result<KeySetPair, CryptoError> {
        let client_view = self.derive_key_sets_client(client_nonce, server_nonce)?;
        Ok(KeySetPair {
            sender: client_view.receiver,
            receiver: client_view.sender,
        })
    }

    /// Keyed-hash signature over `data`
    pub fn symmetric_sign(&self, key: &[u8; 32], data: &[u8]) -> [u8; SYMMETRIC_SIGNATURE_SIZE] {
        *blake3::keyed_hash(key, data).as_bytes()
    }

    pub fn symmetric_verify(
        &self,
        key: &[u8; 32],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let expected = self.symmetric_sign(key, data);
        // blake3::Hash comparison is constant-time
        if blake3::Hash::from(expected) == blake3::Hash::from_bytes(
            signature
                .try_into()
                .map_err(|_| CryptoError::SignatureVerificationFailed)?,
        ) {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerificationFailed)
        }
    }

    /// Encrypt with the set's key; the nonce is the init vector XORed with
    /// `unique` (sequence number or message nonce)
    pub fn symmetric_encrypt(
        &self,
        keys: &SymmetricKeySet,
        unique: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&keys.encrypt_key)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce = aead_nonce(&keys.init_vector, unique);
        cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    pub fn symmetric_decrypt(
        &self,
        keys: &SymmetricKeySet,
        unique: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&keys.encrypt_key)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce = aead_nonce(&keys.init_vector, unique);
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn derive_key_set(
    salt: &[u8],
    ikm: &[u8],
    direction: &[u8],
) -> Result<SymmetricKeySet, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut sign_key = [0u8; 32];
    let mut encrypt_key = [0u8; 32];
    let mut init_vector = [0u8; 12];

    let mut info = direction.to_vec();
    info.extend_from_slice(b"-sign");
    hkdf.expand(&info, &mut sign_key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut info = direction.to_vec();
    info.extend_from_slice(b"-encrypt");
    hkdf.expand(&info, &mut encrypt_key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut info = direction.to_vec();
    info.extend_from_slice(b"-iv");
    hkdf.expand(&info, &mut init_vector)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(SymmetricKeySet {
        sign_key,
        encrypt_key,
        init_vector,
    })
}

/// XOR `unique` into the tail of the init vector
fn aead_nonce(init_vector: &[u8; 12], unique: &[u8]) -> [u8; 12] {
    let mut nonce = *init_vector;
    for (i, byte) in unique.iter().rev().enumerate() {
        if i < 12 {
            nonce[11 - i] ^= *byte;
        }
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_uri_roundtrip() {
        for policy in [SecurityPolicy::None, SecurityPolicy::ChaCha20Poly1305] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()).unwrap(), policy);
        }
        assert!(SecurityPolicy::from_uri("urn:nope").is_err());
    }

    #[test]
    fn nonce_sized_by_policy() {
        assert!(CryptoProvider::new(SecurityPolicy::None)
            .generate_nonce()
            .is_empty());
        assert_eq!(
            CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305)
                .generate_nonce()
                .len(),
            SECURE_CHANNEL_NONCE_LENGTH
        );
    }

    #[test]
    fn client_and_server_derivations_mirror() {
        let provider = CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305);
        let client_nonce = provider.generate_nonce();
        let server_nonce = provider.generate_nonce();
        let client = provider
            .derive_key_sets_client(&client_nonce, &server_nonce)
            .unwrap();
        let server = provider
            .derive_key_sets_server(&client_nonce, &server_nonce)
            .unwrap();
        assert_eq!(client.sender.sign_key, server.receiver.sign_key);
        assert_eq!(client.receiver.encrypt_key, server.sender.encrypt_key);
        assert_ne!(client.sender.sign_key, client.receiver.sign_key);
    }

    #[test]
    fn sign_verify_symmetric() {
        let provider = CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305);
        let key = [7u8; 32];
        let signature = provider.symmetric_sign(&key, b"payload");
        provider
            .symmetric_verify(&key, b"payload", &signature)
            .unwrap();
        assert!(provider
            .symmetric_verify(&key, b"tampered", &signature)
            .is_err());
    }

    #[test]
    fn encrypt_decrypt_symmetric() {
        let provider = CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305);
        let nonces = (provider.generate_nonce(), provider.generate_nonce());
        let keys = provider.derive_key_sets_client(&nonces.0, &nonces.1).unwrap();
        let unique = 42u32.to_le_bytes();
        let ciphertext = provider
            .symmetric_encrypt(&keys.sender, &unique, b"secret payload", b"header")
            .unwrap();
        assert_eq!(ciphertext.len(), b"secret payload".len() + AEAD_TAG_SIZE);
        let plaintext = provider
            .symmetric_decrypt(&keys.sender, &unique, &ciphertext, b"header")
            .unwrap();
        assert_eq!(plaintext, b"secret payload");
        assert!(provider
            .symmetric_decrypt(&keys.sender, &unique, &ciphertext, b"other")
            .is_err());
    }

    #[test]
    fn sealed_box_roundtrip() {
        let receiver = AsymmetricKey::from_seed(&[9u8; 32]);
        let sealed = receiver.certificate().seal(b"opn body").unwrap();
        assert_eq!(sealed.len(), b"opn body".len() + SEAL_OVERHEAD);
        assert_eq!(receiver.open(&sealed).unwrap(), b"opn body");

        let other = AsymmetricKey::from_seed(&[1u8; 32]);
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn asymmetric_sign_verify() {
        let key = AsymmetricKey::from_seed(&[3u8; 32]);
        let cert = key.certificate();
        let signature = key.sign(b"chunk");
        cert.verify(b"chunk", &signature).unwrap();
        assert!(cert.verify(b"other", &signature).is_err());
    }

    #[test]
    fn thumbprint_is_stable() {
        let key = AsymmetricKey::from_seed(&[5u8; 32]);
        assert_eq!(key.certificate().thumbprint(), key.certificate().thumbprint());
    }
}
