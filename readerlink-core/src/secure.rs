//! STid STR secure session primitives
//!
//! The reader and the host prove knowledge of a shared user key with a
//! two-step challenge-response and derive per-connection session keys
//! from the exchanged nonces. Signed mode appends a truncated HMAC-SHA1 to
//! every message, ciphered mode wraps it in AES-128-CBC with a chained IV.
//!
//! This module only computes. Sending the handshake frames is done by the
//! STid STR driver, which feeds each reply into [`HmacHandshake`] or
//! [`AesHandshake`].
//!
//! The key schedule (byte picking, null IV during the handshake, chained
//! IV afterwards) is what the reader firmware expects and is kept as is.

use std::fmt;
use std::sync::Arc;

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::{rngs::OsRng, RngCore};
use readerlink_types::CommunicationMode;
use sha1::Sha1;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::error::AuthError;

type HmacSha1 = Hmac<Sha1>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES block and nonce size
pub const BLOCK_SIZE: usize = 16;

/// Length of the truncated message signature
pub const SIGNATURE_LEN: usize = 10;

/// HMAC session key length
pub const HMAC_SESSION_KEY_LEN: usize = 10;

/// AES session key length
pub const AES_SESSION_KEY_LEN: usize = 16;

/// Command code of both handshake steps
pub const AUTHENTICATE_CODE: u16 = 0x0001;

/// First step payload asking for an HMAC challenge
pub const HMAC_CHALLENGE_REQUEST: [u8; 1] = [0x01];

/// First step payload asking for an AES challenge
pub const AES_CHALLENGE_REQUEST: [u8; 1] = [0x02];

/// Factory HMAC key used when none is configured
pub const DEFAULT_HMAC_KEY: [u8; 10] = [0xA0, 0x87, 0x75, 0x4B, 0x75, 0x47, 0x48, 0x10, 0x94, 0xBE];

/// Factory AES key used when none is configured
pub const DEFAULT_AES_KEY: [u8; 16] = [
    0xE7, 0x4A, 0x54, 0x0F, 0xA0, 0x7C, 0x4D, 0xB1,
    0xB4, 0x64, 0x21, 0x12, 0x6D, 0xF7, 0xAD, 0x36,
];

const NULL_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Result alias for the secure session
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// 16 random bytes from the operating system
pub fn fresh_nonce() -> AuthResult<[u8; BLOCK_SIZE]> {
    nonce_from(&mut OsRng)
}

/// 16 random bytes from `rng`
///
/// Fails if the generator errors or returns a degenerate block (every byte
/// identical).
pub fn nonce_from<R: RngCore>(rng: &mut R) -> AuthResult<[u8; BLOCK_SIZE]> {
    let mut nonce = [0u8; BLOCK_SIZE];
    rng.try_fill_bytes(&mut nonce)
        .map_err(|_| AuthError::InsufficientEntropy)?;
    
    if nonce.iter().all(|&b| b == nonce[0]) {
        return Err(AuthError::InsufficientEntropy);
    }
    
    Ok(nonce)
}

/// HMAC-SHA1 of `data` truncated to [`SIGNATURE_LEN`] bytes
pub fn sign(key: &[u8], data: &[u8]) -> AuthResult<[u8; SIGNATURE_LEN]> {
    let tag = hmac_sha1(key, data)?;
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&tag[..SIGNATURE_LEN]);
    Ok(out)
}

/// Check a truncated signature in constant time
pub fn verify(key: &[u8], data: &[u8], signature: &[u8]) -> AuthResult<bool> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|e| AuthError::Cipher(e.to_string()))?;
    mac.update(data);
    Ok(mac.verify_truncated_left(signature).is_ok())
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> AuthResult<[u8; 20]> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|e| AuthError::Cipher(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// AES-128-CBC encryption, zero-padding the input to a block boundary
pub fn cbc_encrypt(key: &[u8], iv: &[u8], plain: &[u8]) -> AuthResult<Vec<u8>> {
    let mut buf = plain.to_vec();
    let pad = (BLOCK_SIZE - buf.len() % BLOCK_SIZE) % BLOCK_SIZE;
    buf.resize(buf.len() + pad, 0x00);
    
    let cipher = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|e| AuthError::Cipher(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&buf))
}

/// AES-128-CBC decryption without unpadding
pub fn cbc_decrypt(key: &[u8], iv: &[u8], cipher_text: &[u8]) -> AuthResult<Vec<u8>> {
    if cipher_text.len() % BLOCK_SIZE != 0 {
        return Err(AuthError::Cipher(format!(
            "ciphertext length {} is not a multiple of {}",
            cipher_text.len(),
            BLOCK_SIZE
        )));
    }
    
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| AuthError::Cipher(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<NoPadding>(cipher_text)
        .map_err(|e| AuthError::Cipher(e.to_string()))
}

/// Key used to wrap the HMAC handshake nonces
///
/// `HMAC-SHA1(user_key, user_key || rnd_a)` truncated to 16 bytes.
pub fn hmac_ephemeral_key(user_key: &[u8], rnd_a: &[u8]) -> AuthResult<Zeroizing<[u8; 16]>> {
    let mut input = Zeroizing::new(Vec::with_capacity(user_key.len() + rnd_a.len()));
    input.extend_from_slice(user_key);
    input.extend_from_slice(rnd_a);
    
    let mut tag = hmac_sha1(user_key, &input)?;
    let mut key = Zeroizing::new([0u8; 16]);
    key.copy_from_slice(&tag[..16]);
    tag.zeroize();
    Ok(key)
}

/// HMAC session key picked from the host and reader nonces
pub fn derive_hmac_session_key(
    rnd_b: &[u8; BLOCK_SIZE],
    rnd_c: &[u8; BLOCK_SIZE],
) -> [u8; HMAC_SESSION_KEY_LEN] {
    [
        rnd_b[0], rnd_b[1], rnd_b[2],
        rnd_c[0], rnd_c[1],
        rnd_b[14], rnd_b[15],
        rnd_c[13], rnd_c[14], rnd_c[15],
    ]
}

/// AES session key picked from the reader and host nonces
pub fn derive_aes_session_key(
    rnd_a: &[u8; BLOCK_SIZE],
    rnd_b: &[u8; BLOCK_SIZE],
) -> [u8; AES_SESSION_KEY_LEN] {
    [
        rnd_a[0], rnd_a[1], rnd_a[2], rnd_a[3],
        rnd_b[0], rnd_b[1], rnd_b[2], rnd_b[3],
        rnd_a[12], rnd_a[13], rnd_a[14], rnd_a[15],
        rnd_b[12], rnd_b[13], rnd_b[14], rnd_b[15],
    ]
}

fn block(bytes: &[u8]) -> AuthResult<[u8; BLOCK_SIZE]> {
    bytes.try_into().map_err(|_| AuthError::BadResponseLength {
        expected: BLOCK_SIZE,
        actual: bytes.len(),
    })
}

/// Host side of the signed-mode handshake
///
/// 1. send [`HMAC_CHALLENGE_REQUEST`], the reply is `rndA`
/// 2. send [`HmacHandshake::respond`] output, the reply goes to
///    [`HmacHandshake::finish`] which yields the HMAC session key
pub struct HmacHandshake {
    user_key: Zeroizing<Vec<u8>>,
    rnd_b: Zeroizing<[u8; BLOCK_SIZE]>,
    ephemeral: Option<Zeroizing<[u8; 16]>>,
}

impl HmacHandshake {
    /// Start with a fresh host nonce; an empty key selects [`DEFAULT_HMAC_KEY`]
    pub fn new(user_key: &[u8]) -> AuthResult<Self> {
        Ok(Self::with_nonce(user_key, fresh_nonce()?))
    }
    
    /// Start with a caller-chosen host nonce
    pub fn with_nonce(user_key: &[u8], rnd_b: [u8; BLOCK_SIZE]) -> Self {
        let user_key = if user_key.is_empty() {
            debug!("Empty HMAC key, using the default one");
            DEFAULT_HMAC_KEY.to_vec()
        } else {
            user_key.to_vec()
        };
        
        Self {
            user_key: Zeroizing::new(user_key),
            rnd_b: Zeroizing::new(rnd_b),
            ephemeral: None,
        }
    }
    
    /// Encrypt `rndA || rndB` for the second step
    pub fn respond(&mut self, rnd_a: &[u8]) -> AuthResult<Vec<u8>> {
        let ephemeral = hmac_ephemeral_key(&self.user_key, rnd_a)?;
        
        let mut plain = Zeroizing::new(Vec::with_capacity(rnd_a.len() + BLOCK_SIZE));
        plain.extend_from_slice(rnd_a);
        plain.extend_from_slice(&*self.rnd_b);
        
        let encrypted = cbc_encrypt(&*ephemeral, &NULL_IV, &plain)?;
        self.ephemeral = Some(ephemeral);
        Ok(encrypted)
    }
    
    /// Check the reader's `rndB' || rndC` and derive the session key
    pub fn finish(self, reply: &[u8]) -> AuthResult<[u8; HMAC_SESSION_KEY_LEN]> {
        let ephemeral = self
            .ephemeral
            .as_ref()
            .ok_or(AuthError::MissingSessionKey("handshake ephemeral"))?;
        
        let plain = Zeroizing::new(cbc_decrypt(&**ephemeral, &NULL_IV, reply)?);
        if plain.len() != 2 * BLOCK_SIZE {
            return Err(AuthError::BadResponseLength {
                expected: 2 * BLOCK_SIZE,
                actual: plain.len(),
            });
        }
        
        if plain[..BLOCK_SIZE] != self.rnd_b[..] {
            return Err(AuthError::NonceMismatch);
        }
        
        let rnd_c = Zeroizing::new(block(&plain[BLOCK_SIZE..])?);
        Ok(derive_hmac_session_key(&self.rnd_b, &rnd_c))
    }
}

/// Host side of the ciphered-mode handshake
///
/// 1. send [`AES_CHALLENGE_REQUEST`], the reply is `AES(user_key, rndA)`
/// 2. send [`AesHandshake::respond`] output, the reply goes to
///    [`AesHandshake::finish`] which yields the AES session key
pub struct AesHandshake {
    user_key: Zeroizing<Vec<u8>>,
    rnd_b: Zeroizing<[u8; BLOCK_SIZE]>,
    rnd_a: Option<Zeroizing<[u8; BLOCK_SIZE]>>,
}

impl AesHandshake {
    /// Start with a fresh host nonce; an empty key selects [`DEFAULT_AES_KEY`]
    pub fn new(user_key: &[u8]) -> AuthResult<Self> {
        Ok(Self::with_nonce(user_key, fresh_nonce()?))
    }
    
    pub fn with_nonce(user_key: &[u8], rnd_b: [u8; BLOCK_SIZE]) -> Self {
        let user_key = if user_key.is_empty() {
            debug!("Empty AES key, using the default one");
            DEFAULT_AES_KEY.to_vec()
        } else {
            user_key.to_vec()
        };
        
        Self {
            user_key: Zeroizing::new(user_key),
            rnd_b: Zeroizing::new(rnd_b),
            rnd_a: None,
        }
    }
    
    /// Recover `rndA` and encrypt `rndA || rndB` for the second step
    pub fn respond(&mut self, encrypted_rnd_a: &[u8]) -> AuthResult<Vec<u8>> {
        let plain = Zeroizing::new(cbc_decrypt(&self.user_key, &NULL_IV, encrypted_rnd_a)?);
        let rnd_a = Zeroizing::new(block(&plain)?);
        
        let mut buf = Zeroizing::new(Vec::with_capacity(2 * BLOCK_SIZE));
        buf.extend_from_slice(&*rnd_a);
        buf.extend_from_slice(&*self.rnd_b);
        
        let encrypted = cbc_encrypt(&self.user_key, &NULL_IV, &buf)?;
        self.rnd_a = Some(rnd_a);
        Ok(encrypted)
    }
    
    /// Check the reader's `rndB` echo and derive the session key
    pub fn finish(self, reply: &[u8]) -> AuthResult<[u8; AES_SESSION_KEY_LEN]> {
        let rnd_a = self
            .rnd_a
            .as_ref()
            .ok_or(AuthError::MissingSessionKey("handshake challenge"))?;
        
        let plain = Zeroizing::new(cbc_decrypt(&self.user_key, &NULL_IV, reply)?);
        if plain[..] != self.rnd_b[..] {
            return Err(AuthError::NonceMismatch);
        }
        
        Ok(derive_aes_session_key(rnd_a, &self.rnd_b))
    }
}

/// Negotiated session keys, wiped on clear and on drop
#[derive(Default)]
pub struct SessionKeys {
    hmac: Option<[u8; HMAC_SESSION_KEY_LEN]>,
    aes: Option<[u8; AES_SESSION_KEY_LEN]>,
}

impl SessionKeys {
    pub fn set_hmac(&mut self, key: [u8; HMAC_SESSION_KEY_LEN]) {
        self.hmac.zeroize();
        self.hmac = Some(key);
    }
    
    pub fn set_aes(&mut self, key: [u8; AES_SESSION_KEY_LEN]) {
        self.aes.zeroize();
        self.aes = Some(key);
    }
    
    pub fn hmac(&self) -> AuthResult<&[u8; HMAC_SESSION_KEY_LEN]> {
        self.hmac.as_ref().ok_or(AuthError::MissingSessionKey("HMAC"))
    }
    
    pub fn aes(&self) -> AuthResult<&[u8; AES_SESSION_KEY_LEN]> {
        self.aes.as_ref().ok_or(AuthError::MissingSessionKey("AES"))
    }
    
    pub fn is_empty(&self) -> bool {
        self.hmac.is_none() && self.aes.is_none()
    }
    
    pub fn clear(&mut self) {
        self.hmac.zeroize();
        self.aes.zeroize();
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("hmac", &self.hmac.map(|_| "<redacted>"))
            .field("aes", &self.aes.map(|_| "<redacted>"))
            .finish()
    }
}

/// Secure session progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    HandshakeInFlight,
    Authenticated,
}

/// Communication mode cell shared by the reader driver and its adapter
///
/// Cloning is cheap and every clone sees the same value.
#[derive(Debug, Clone, Default)]
pub struct SharedMode {
    inner: Arc<RwLock<CommunicationMode>>,
}

impl SharedMode {
    pub fn new(mode: CommunicationMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mode)),
        }
    }
    
    pub fn get(&self) -> CommunicationMode {
        *self.inner.read()
    }
    
    pub fn set(&self, mode: CommunicationMode) {
        *self.inner.write() = mode;
    }
    
    /// Force `mode` until the returned guard is dropped
    ///
    /// # Examples
    ///
    /// ```
    /// use readerlink_core::secure::SharedMode;
    /// use readerlink_types::CommunicationMode;
    ///
    /// let mode = SharedMode::new(CommunicationMode::SIGNED);
    /// {
    ///     let _guard = mode.override_with(CommunicationMode::RESERVED);
    ///     assert_eq!(mode.get(), CommunicationMode::RESERVED);
    /// }
    /// assert_eq!(mode.get(), CommunicationMode::SIGNED);
    /// ```
    pub fn override_with(&self, mode: CommunicationMode) -> ModeOverride {
        let previous = {
            let mut current = self.inner.write();
            std::mem::replace(&mut *current, mode)
        };
        
        ModeOverride {
            cell: self.clone(),
            previous,
        }
    }
}

/// Restores the overridden communication mode on drop
#[must_use = "the previous mode is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ModeOverride {
    cell: SharedMode,
    previous: CommunicationMode,
}

impl ModeOverride {
    /// Mode that will be restored
    pub fn previous(&self) -> CommunicationMode {
        self.previous
    }
}

impl Drop for ModeOverride {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::mock::StepRng;
    
    const RND_A: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
        0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    ];
    const RND_B: [u8; 16] = [
        0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7,
        0xB8, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF,
    ];
    const RND_C: [u8; 16] = [
        0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7,
        0xC8, 0xC9, 0xCA, 0xCB, 0xCC, 0xCD, 0xCE, 0xCF,
    ];
    
    #[test]
    fn test_aes_known_answer() {
        let key: Vec<u8> = (0u8..16).collect();
        let plain = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        
        let encrypted = cbc_encrypt(&key, &NULL_IV, &plain).unwrap();
        assert_eq!(hex::encode(&encrypted), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(cbc_decrypt(&key, &NULL_IV, &encrypted).unwrap(), plain);
    }
    
    #[test]
    fn test_cbc_zero_pads() {
        let encrypted = cbc_encrypt(&DEFAULT_AES_KEY, &NULL_IV, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(encrypted.len(), 16);
        
        let plain = cbc_decrypt(&DEFAULT_AES_KEY, &NULL_IV, &encrypted).unwrap();
        assert_eq!(&plain[..3], &[0x01, 0x02, 0x03]);
        assert!(plain[3..].iter().all(|&b| b == 0));
    }
    
    #[test]
    fn test_cbc_decrypt_rejects_partial_block() {
        let err = cbc_decrypt(&DEFAULT_AES_KEY, &NULL_IV, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, AuthError::Cipher(_)));
    }
    
    #[test]
    fn test_hmac_known_answer() {
        let signature = sign(&[0x0B; 20], b"Hi There").unwrap();
        assert_eq!(hex::encode(signature), "b617318655057264e28b");
        assert!(verify(&[0x0B; 20], b"Hi There", &signature).unwrap());
        assert!(!verify(&[0x0B; 20], b"Hi there", &signature).unwrap());
    }
    
    #[test]
    fn test_ephemeral_key() {
        let key = hmac_ephemeral_key(&DEFAULT_HMAC_KEY, &RND_A).unwrap();
        assert_eq!(hex::encode(&*key), "4d4c641859a06968272635e89df422e9");
    }
    
    #[test]
    fn test_session_key_byte_picking() {
        assert_eq!(
            derive_hmac_session_key(&RND_B, &RND_C),
            [0xB0, 0xB1, 0xB2, 0xC0, 0xC1, 0xBE, 0xBF, 0xCD, 0xCE, 0xCF]
        );
        assert_eq!(
            derive_aes_session_key(&RND_A, &RND_B),
            [
                0x00, 0x01, 0x02, 0x03, 0xB0, 0xB1, 0xB2, 0xB3,
                0x0C, 0x0D, 0x0E, 0x0F, 0xBC, 0xBD, 0xBE, 0xBF,
            ]
        );
    }
    
    // Reader half of the HMAC handshake, second step
    fn reader_hmac_reply(key: &[u8], rnd_a: &[u8], request: &[u8], rnd_c: &[u8]) -> Vec<u8> {
        let ephemeral = hmac_ephemeral_key(key, rnd_a).unwrap();
        let plain = cbc_decrypt(&*ephemeral, &NULL_IV, request).unwrap();
        let mut reply = plain[16..32].to_vec();
        reply.extend_from_slice(rnd_c);
        cbc_encrypt(&*ephemeral, &NULL_IV, &reply).unwrap()
    }
    
    #[test]
    fn test_hmac_handshake() {
        let mut handshake = HmacHandshake::with_nonce(&[], RND_B);
        let request = handshake.respond(&RND_A).unwrap();
        assert_eq!(request.len(), 32);
        
        let reply = reader_hmac_reply(&DEFAULT_HMAC_KEY, &RND_A, &request, &RND_C);
        let key = handshake.finish(&reply).unwrap();
        assert_eq!(key, derive_hmac_session_key(&RND_B, &RND_C));
    }
    
    #[test]
    fn test_hmac_handshake_nonce_mismatch() {
        let mut handshake = HmacHandshake::with_nonce(&[], RND_B);
        handshake.respond(&RND_A).unwrap();
        
        let ephemeral = hmac_ephemeral_key(&DEFAULT_HMAC_KEY, &RND_A).unwrap();
        let mut forged = RND_B.to_vec();
        forged[7] ^= 0x01;
        forged.extend_from_slice(&RND_C);
        let reply = cbc_encrypt(&*ephemeral, &NULL_IV, &forged).unwrap();
        
        assert_eq!(handshake.finish(&reply), Err(AuthError::NonceMismatch));
    }
    
    #[test]
    fn test_hmac_handshake_bad_length() {
        let mut handshake = HmacHandshake::with_nonce(&[], RND_B);
        handshake.respond(&RND_A).unwrap();
        
        let ephemeral = hmac_ephemeral_key(&DEFAULT_HMAC_KEY, &RND_A).unwrap();
        let reply = cbc_encrypt(&*ephemeral, &NULL_IV, &RND_B).unwrap();
        
        assert_eq!(
            handshake.finish(&reply),
            Err(AuthError::BadResponseLength { expected: 32, actual: 16 })
        );
    }
    
    #[test]
    fn test_aes_handshake() {
        let user_key = [0x42u8; 16];
        let challenge = cbc_encrypt(&user_key, &NULL_IV, &RND_A).unwrap();
        
        let mut handshake = AesHandshake::with_nonce(&user_key, RND_B);
        let request = handshake.respond(&challenge).unwrap();
        
        // reader decrypts rndA || rndB and echoes rndB
        let plain = cbc_decrypt(&user_key, &NULL_IV, &request).unwrap();
        assert_eq!(&plain[..16], &RND_A);
        let reply = cbc_encrypt(&user_key, &NULL_IV, &plain[16..]).unwrap();
        
        let key = handshake.finish(&reply).unwrap();
        assert_eq!(key, derive_aes_session_key(&RND_A, &RND_B));
    }
    
    #[test]
    fn test_aes_handshake_nonce_mismatch() {
        let challenge = cbc_encrypt(&DEFAULT_AES_KEY, &NULL_IV, &RND_A).unwrap();
        let mut handshake = AesHandshake::with_nonce(&[], RND_B);
        handshake.respond(&challenge).unwrap();
        
        let mut echoed = RND_B;
        echoed[15] ^= 0x80;
        let reply = cbc_encrypt(&DEFAULT_AES_KEY, &NULL_IV, &echoed).unwrap();
        
        assert_eq!(handshake.finish(&reply), Err(AuthError::NonceMismatch));
    }
    
    #[test]
    fn test_finish_before_respond() {
        let handshake = AesHandshake::with_nonce(&[], RND_B);
        assert!(matches!(
            handshake.finish(&[0u8; 16]),
            Err(AuthError::MissingSessionKey(_))
        ));
    }
    
    #[test]
    fn test_degenerate_nonce_rejected() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(nonce_from(&mut rng), Err(AuthError::InsufficientEntropy));
        
        let nonce = fresh_nonce().unwrap();
        assert!(nonce.iter().any(|&b| b != nonce[0]));
    }
    
    #[test]
    fn test_session_keys_clear() {
        let mut keys = SessionKeys::default();
        assert!(keys.is_empty());
        assert_eq!(keys.hmac(), Err(AuthError::MissingSessionKey("HMAC")));
        
        keys.set_hmac([0x11; 10]);
        keys.set_aes([0x22; 16]);
        assert_eq!(keys.aes().unwrap(), &[0x22; 16]);
        assert!(!format!("{:?}", keys).contains("22"));
        
        keys.clear();
        assert!(keys.is_empty());
    }
    
    #[test]
    fn test_mode_override_restores_on_early_return() {
        fn failing_step(mode: &SharedMode) -> Result<(), AuthError> {
            let _guard = mode.override_with(CommunicationMode::RESERVED);
            assert!(mode.get().is_reserved());
            Err(AuthError::HandshakeTimeout)
        }
        
        let mode = SharedMode::new(CommunicationMode::SIGNED | CommunicationMode::CIPHERED);
        let observer = mode.clone();
        
        assert!(failing_step(&mode).is_err());
        assert_eq!(observer.get(), CommunicationMode::SIGNED | CommunicationMode::CIPHERED);
    }
}
