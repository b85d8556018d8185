use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CodecError, Result};
use crate::keypack::{KeyPack, IV_LEN, KEY_LEN};
use crate::Codec;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC codec with a per-message initialization vector.
///
/// `encode` encrypts under the current IV, prepends that IV to the
/// ciphertext, then rotates to a fresh random IV so encoding the same
/// plaintext twice never yields the same bytes. `decode` reads the IV
/// back off the front of the ciphertext, which removes any need for the
/// peers to keep IV state in sync.
pub struct AesCbcCodec {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl AesCbcCodec {
    /// Create a codec with a fresh random key and IV.
    pub fn new() -> Self {
        let pack = KeyPack::random();
        Self {
            key: pack.key,
            iv: pack.iv,
        }
    }

    /// Create a codec adopting `key`, with a fresh random IV.
    pub fn with_key(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(CodecError::KeyLength { len: key.len() });
        }
        let mut codec = Self::new();
        codec.key.copy_from_slice(key);
        Ok(codec)
    }

    /// Create a codec from a bootstrap key pack, adopting both halves.
    pub fn from_pack(pack: &KeyPack) -> Self {
        Self {
            key: pack.key,
            iv: pack.iv,
        }
    }

    /// The current key.
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Replace the key. The IV is untouched.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != KEY_LEN {
            return Err(CodecError::KeyLength { len: key.len() });
        }
        self.key.copy_from_slice(key);
        Ok(())
    }

    /// Snapshot key and current IV as the 48-byte bootstrap pack.
    pub fn key_pack(&self) -> KeyPack {
        KeyPack {
            key: self.key,
            iv: self.iv,
        }
    }

    fn rotate_iv(&mut self) {
        OsRng.fill_bytes(&mut self.iv);
    }
}

impl Default for AesCbcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for AesCbcCodec {
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        let cipher = Aes256CbcEnc::new(&self.key.into(), &self.iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&ciphertext);

        // One IV per message; the one just used must never recur.
        self.rotate_iv();

        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        if data.len() <= IV_LEN {
            return Err(CodecError::CiphertextTooShort { len: data.len() });
        }

        let (iv, ciphertext) = data.split_at(IV_LEN);
        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);

        let cipher = Aes256CbcDec::new(&self.key.into(), &iv_arr.into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CodecError::Padding)
    }
}

impl std::fmt::Debug for AesCbcCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCbcCodec")
            .field("key", &format_args!("<redacted:{KEY_LEN} bytes>"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = &[4, 8, 15, 16, 23, 42];

    #[test]
    fn roundtrip_small() {
        let mut codec = AesCbcCodec::new();
        let encoded = codec.encode(SAMPLE).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.as_slice(), SAMPLE);
    }

    #[test]
    fn repeated_encodes_differ_but_both_decode() {
        let mut sender = AesCbcCodec::new();
        let first = sender.encode(SAMPLE).unwrap();
        let second = sender.encode(SAMPLE).unwrap();
        assert_ne!(first, second, "IV rotation must vary the ciphertext");

        let mut receiver = AesCbcCodec::with_key(sender.key()).unwrap();
        assert_eq!(receiver.decode(&first).unwrap().as_slice(), SAMPLE);
        assert_eq!(receiver.decode(&second).unwrap().as_slice(), SAMPLE);
    }

    #[test]
    fn roundtrip_large_random() {
        let mut payload = vec![0u8; 8192];
        OsRng.fill_bytes(&mut payload);

        let mut sender = AesCbcCodec::new();
        let first = sender.encode(&payload).unwrap();
        let second = sender.encode(&payload).unwrap();
        assert_ne!(first, second);

        let mut receiver = AesCbcCodec::with_key(sender.key()).unwrap();
        assert_eq!(receiver.decode(&first).unwrap(), payload);
        assert_eq!(receiver.decode(&second).unwrap(), payload);
    }

    #[test]
    fn encode_prepends_current_iv() {
        let mut codec = AesCbcCodec::new();
        let iv_before = codec.key_pack().iv;
        let encoded = codec.encode(SAMPLE).unwrap();
        assert_eq!(&encoded[..IV_LEN], &iv_before);
        assert_ne!(codec.key_pack().iv, iv_before, "IV must rotate after encode");
    }

    #[test]
    fn empty_input_fails_both_ways() {
        let mut codec = AesCbcCodec::new();
        assert!(matches!(codec.encode(&[]), Err(CodecError::EmptyInput)));
        assert!(matches!(codec.decode(&[]), Err(CodecError::EmptyInput)));
    }

    #[test]
    fn short_ciphertext_rejected() {
        let mut codec = AesCbcCodec::new();
        let result = codec.decode(&[0u8; 16]);
        assert!(matches!(
            result,
            Err(CodecError::CiphertextTooShort { len: 16 })
        ));
    }

    #[test]
    fn wrong_key_fails_padding() {
        let mut sender = AesCbcCodec::new();
        let encoded = sender.encode(SAMPLE).unwrap();

        let mut stranger = AesCbcCodec::new();
        assert!(matches!(
            stranger.decode(&encoded),
            Err(CodecError::Padding)
        ));
    }

    #[test]
    fn set_key_replaces_key_only() {
        let mut codec = AesCbcCodec::new();
        let iv = codec.key_pack().iv;
        let new_key = [7u8; KEY_LEN];
        codec.set_key(&new_key).unwrap();
        assert_eq!(codec.key(), &new_key);
        assert_eq!(codec.key_pack().iv, iv);

        assert!(matches!(
            codec.set_key(&[0u8; 31]),
            Err(CodecError::KeyLength { len: 31 })
        ));
    }

    #[test]
    fn with_key_rejects_bad_length() {
        assert!(matches!(
            AesCbcCodec::with_key(&[0u8; 16]),
            Err(CodecError::KeyLength { len: 16 })
        ));
    }

    #[test]
    fn pack_seeds_receiver_state() {
        let sender = AesCbcCodec::new();
        let pack = sender.key_pack();
        let receiver = AesCbcCodec::from_pack(&pack);
        assert_eq!(receiver.key(), sender.key());
        assert_eq!(receiver.key_pack().iv, pack.iv);
    }

    #[test]
    fn debug_redacts_key() {
        let codec = AesCbcCodec::new();
        let debug = format!("{codec:?}");
        assert!(debug.contains("<redacted:32 bytes>"));
    }
}
