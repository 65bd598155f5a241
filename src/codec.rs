//! Encrypted envelope codec.
//!
//! Every payload after the discovery probe travels as
//! `{"t":"pack","i":0|1,"pack":"<base64>",...}` where `pack` is the JSON payload,
//! PKCS#7-padded and encrypted with AES-128 in ECB mode.

use std::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

const BLOCK: usize = 16;

/// Key shared by every device of the protocol family; used for discovery and binding only.
pub const GENERIC_KEY: Key = Key(*b"a3K8Bx%2r8Y7#xDh");

/// 128-bit cipher key. Never printed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; BLOCK]);

impl Key {
    pub const fn new(bytes: [u8; BLOCK]) -> Self {
        Self(bytes)
    }

    /// Keys travel as 16-character strings in bind responses and key stores.
    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        let bytes: [u8; BLOCK] = text
            .as_bytes()
            .try_into()
            .map_err(|_| DecodeError::KeyLength { len: text.len() })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK] {
        &self.0
    }

    fn cipher(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Device-scoped key negotiated by binding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionKey(Key);

impl SessionKey {
    pub fn new(key: Key) -> Self {
        Self(key)
    }

    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        Key::from_text(text).map(Self)
    }

    pub fn key(&self) -> &Key {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Plaintext wrapper around an encrypted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub t: String,
    #[serde(default)]
    pub i: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcid: Option<String>,
    pub pack: String,
}

impl Envelope {
    pub const PACK: &'static str = "pack";

    /// Marks the payload as sealed with the generic key.
    pub fn with_generic_flag(mut self) -> Self {
        self.i = 1;
        self
    }

    pub fn with_client(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self.uid = Some(0);
        self
    }

    pub fn with_target(mut self, tcid: impl Into<String>) -> Self {
        self.tcid = Some(tcid.into());
        self
    }

    pub fn uses_generic_key(&self) -> bool {
        self.i == 1
    }

    pub fn from_slice(datagram: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(datagram).map_err(DecodeError::InvalidFrame)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

pub fn encode(key: &Key, payload: &Value) -> Envelope {
    let plaintext = payload.to_string();
    Envelope {
        t: Envelope::PACK.to_string(),
        i: 0,
        uid: None,
        cid: None,
        tcid: None,
        pack: seal(key, plaintext.as_bytes()),
    }
}

pub fn decode(key: &Key, envelope: &Envelope) -> Result<Value, DecodeError> {
    let plaintext = open(key, &envelope.pack)?;
    serde_json::from_slice(&plaintext).map_err(DecodeError::InvalidJson)
}

/// Pads, encrypts and base64-encodes `plaintext`.
pub fn seal(key: &Key, plaintext: &[u8]) -> String {
    let pad = BLOCK - plaintext.len() % BLOCK;
    let mut buf = Vec::with_capacity(plaintext.len() + pad);
    buf.extend_from_slice(plaintext);
    buf.resize(plaintext.len() + pad, pad as u8);

    let cipher = key.cipher();
    for chunk in buf.chunks_exact_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    STANDARD.encode(buf)
}

/// Inverse of [`seal`]: base64-decodes, decrypts and strips the padding.
pub fn open(key: &Key, blob: &str) -> Result<Vec<u8>, DecodeError> {
    // Some firmware terminates the blob with a newline.
    let mut buf = STANDARD.decode(blob.trim_end())?;
    if buf.is_empty() || buf.len() % BLOCK != 0 {
        return Err(DecodeError::Misaligned { len: buf.len() });
    }

    let cipher = key.cipher();
    for chunk in buf.chunks_exact_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let pad = buf[buf.len() - 1] as usize;
    if pad == 0 || pad > BLOCK || !buf[buf.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(DecodeError::BadPadding);
    }
    buf.truncate(buf.len() - pad);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_KEY: Key = Key(*b"ThisIsASecretKey");

    #[test]
    fn status_payload_round_trips() {
        let payload = json!({"t": "status", "mac": "abc123"});
        let envelope = encode(&TEST_KEY, &payload);
        let decoded = decode(&TEST_KEY, &envelope).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.to_string(), payload.to_string());
    }

    #[test]
    fn padding_adds_full_block_on_boundary() {
        let sealed = seal(&TEST_KEY, &[b'x'; 16]);
        assert_eq!(STANDARD.decode(sealed).unwrap().len(), 32);
    }

    #[test]
    fn padding_lengths_around_block_boundary() {
        for len in [15usize, 16, 17, 31, 32, 33] {
            let plaintext = vec![b'a'; len];
            let sealed = seal(&TEST_KEY, &plaintext);
            assert_eq!(open(&TEST_KEY, &sealed).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn known_generic_key_vector() {
        // {"t":"scan"} sealed with the generic key, as captured from a unit.
        let sealed = seal(&GENERIC_KEY, br#"{"t":"scan"}"#);
        assert_eq!(open(&GENERIC_KEY, &sealed).unwrap(), br#"{"t":"scan"}"#);
    }

    #[test]
    fn malformed_base64() {
        let err = open(&TEST_KEY, "not base64!!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn misaligned_ciphertext() {
        let blob = STANDARD.encode([0u8; 10]);
        let err = open(&TEST_KEY, &blob).unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { len: 10 }));
    }

    #[test]
    fn empty_ciphertext_is_misaligned() {
        let err = open(&TEST_KEY, "").unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { len: 0 }));
    }

    #[test]
    fn bad_padding_detected() {
        // A block whose plaintext ends in 0x00 can never carry valid padding.
        let mut block = [0u8; 16];
        TEST_KEY.cipher().encrypt_block(GenericArray::from_mut_slice(&mut block));
        let err = open(&TEST_KEY, &STANDARD.encode(block)).unwrap_err();
        assert!(matches!(err, DecodeError::BadPadding));
    }

    #[test]
    fn unpadded_plaintext_that_is_not_json() {
        let envelope = Envelope {
            t: "pack".into(),
            i: 0,
            uid: None,
            cid: None,
            tcid: None,
            pack: seal(&TEST_KEY, b"{not json"),
        };
        let err = decode(&TEST_KEY, &envelope).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn trailing_newline_tolerated() {
        let sealed = format!("{}\n", seal(&TEST_KEY, b"{}"));
        assert_eq!(open(&TEST_KEY, &sealed).unwrap(), b"{}");
    }

    #[test]
    fn key_from_text_checks_length() {
        assert!(Key::from_text("a3K8Bx%2r8Y7#xDh").is_ok());
        let err = Key::from_text("short").unwrap_err();
        assert!(matches!(err, DecodeError::KeyLength { len: 5 }));
    }

    #[test]
    fn key_debug_is_redacted() {
        let shown = format!("{:?} {:?}", GENERIC_KEY, SessionKey::new(TEST_KEY));
        assert!(!shown.contains("a3K8"));
        assert!(!shown.contains("Secret"));
    }

    #[test]
    fn envelope_framing() {
        let envelope = encode(&GENERIC_KEY, &json!({"t": "bind"}))
            .with_generic_flag()
            .with_client("app")
            .with_target("aabbcc112233");
        let wire: Value = serde_json::from_slice(&envelope.to_vec()).unwrap();
        assert_eq!(wire["t"], "pack");
        assert_eq!(wire["i"], 1);
        assert_eq!(wire["cid"], "app");
        assert_eq!(wire["uid"], 0);
        assert_eq!(wire["tcid"], "aabbcc112233");

        let parsed = Envelope::from_slice(&envelope.to_vec()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn envelope_frame_errors() {
        assert!(matches!(
            Envelope::from_slice(b"garbage"),
            Err(DecodeError::InvalidFrame(_))
        ));
        assert!(matches!(
            Envelope::from_slice(br#"{"t":"scan"}"#),
            Err(DecodeError::InvalidFrame(_))
        ));
    }
}
