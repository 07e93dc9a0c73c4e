//! AES-CBC with PKCS#7 padding.
//!
//! CBC ciphertexts produced here carry the IV as their first block. They are
//! not authenticated: callers must authenticate ciphertexts (e.g. with
//! [`crate::hash::hmac`]) before decrypting them to avoid a padding oracle.
use aes::{
    cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes128, Aes192, Aes256,
};
use rand::{rngs::OsRng, RngCore};

use crate::Error;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;
/// Default AES key length.
pub const AES_KEY_LENGTH: usize = 32;

/// Return `len` bytes from the operating system RNG.
pub fn get_random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Return a random AES key of `AES_KEY_LENGTH` bytes.
pub fn generate_aes_key() -> Vec<u8> {
    get_random_bytes(AES_KEY_LENGTH)
}

/// Pad as prescribed by PKCS#7.
///
/// A full block of padding is appended when the input is already aligned.
pub fn pkcs7_pad(src: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - src.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(src.len() + padding);
    padded.extend_from_slice(src);
    padded.resize(src.len() + padding, padding as u8);
    padded
}

/// Strip PKCS#7 padding.
pub fn pkcs7_unpad(src: &[u8]) -> Result<Vec<u8>, Error> {
    let length = src.len();
    let unpadding = *src.last().ok_or(Error::InvalidPadding)? as usize;

    if unpadding == 0 || unpadding > BLOCK_SIZE || unpadding > length {
        return Err(Error::InvalidPadding);
    }
    if src[length - unpadding..]
        .iter()
        .any(|&b| b as usize != unpadding)
    {
        return Err(Error::InvalidPadding);
    }

    Ok(src[..length - unpadding].to_vec())
}

fn encrypt_blocks(key: &[u8], iv: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .encrypt_padded_vec_mut::<NoPadding>(src),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .encrypt_padded_vec_mut::<NoPadding>(src),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .encrypt_padded_vec_mut::<NoPadding>(src),
        _ => return Err(Error::InvalidKeyParameter),
    };
    Ok(ciphertext)
}

fn decrypt_blocks(key: &[u8], iv: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    let plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .decrypt_padded_vec_mut::<NoPadding>(src),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .decrypt_padded_vec_mut::<NoPadding>(src),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyParameter)?
            .decrypt_padded_vec_mut::<NoPadding>(src),
        _ => return Err(Error::InvalidKeyParameter),
    };
    plaintext.map_err(|_| Error::InvalidInput("ciphertext is not a multiple of the block size"))
}

/// Encrypt a block-aligned plaintext in CBC mode under a fresh random IV.
///
/// The result is `IV || ciphertext`.
pub fn cbc_encrypt(key: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    if src.len() % BLOCK_SIZE != 0 {
        return Err(Error::InvalidInput(
            "plaintext is not a multiple of the block size",
        ));
    }

    let iv = get_random_bytes(BLOCK_SIZE);
    let encrypted = encrypt_blocks(key, &iv, src)?;

    let mut ciphertext = Vec::with_capacity(BLOCK_SIZE + encrypted.len());
    ciphertext.extend_from_slice(&iv);
    ciphertext.extend_from_slice(&encrypted);
    Ok(ciphertext)
}

/// Decrypt an `IV || ciphertext` buffer produced by [`cbc_encrypt`].
pub fn cbc_decrypt(key: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    if src.len() < BLOCK_SIZE {
        return Err(Error::CiphertextTooShort);
    }
    let (iv, src) = src.split_at(BLOCK_SIZE);

    // CBC mode always works in whole blocks.
    if src.len() % BLOCK_SIZE != 0 {
        return Err(Error::InvalidInput(
            "ciphertext is not a multiple of the block size",
        ));
    }

    decrypt_blocks(key, iv, src)
}

/// PKCS#7 pad then encrypt in CBC mode.
pub fn cbc_pkcs7_encrypt(key: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    cbc_encrypt(key, &pkcs7_pad(src))
}

/// Decrypt in CBC mode then strip the PKCS#7 padding.
pub fn cbc_pkcs7_decrypt(key: &[u8], src: &[u8]) -> Result<Vec<u8>, Error> {
    let padded = cbc_decrypt(key, src)?;
    pkcs7_unpad(&padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkcs7_pad_lengths() {
        for len in 0..=3 * BLOCK_SIZE {
            let src = vec![0xaau8; len];
            let padded = pkcs7_pad(&src);

            assert_eq!(padded.len() % BLOCK_SIZE, 0);
            assert!(padded.len() > src.len());
            assert_eq!(&padded[..len], &src[..]);
            assert_eq!(pkcs7_unpad(&padded).unwrap(), src);
        }

        // Aligned input gets a full padding block.
        let padded = pkcs7_pad(&[1u8; BLOCK_SIZE]);
        assert_eq!(padded.len(), 2 * BLOCK_SIZE);
        assert_eq!(&padded[BLOCK_SIZE..], &[BLOCK_SIZE as u8; BLOCK_SIZE][..]);
    }

    #[test]
    fn test_pkcs7_unpad_invalid() {
        let mut buf = vec![7u8; BLOCK_SIZE];
        buf[BLOCK_SIZE - 1] = 0;
        assert_eq!(pkcs7_unpad(&buf), Err(Error::InvalidPadding));

        buf[BLOCK_SIZE - 1] = BLOCK_SIZE as u8 + 1;
        assert_eq!(pkcs7_unpad(&buf), Err(Error::InvalidPadding));

        // Last byte claims 3 bytes of padding but the run is broken.
        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[BLOCK_SIZE - 1] = 3;
        buf[BLOCK_SIZE - 2] = 3;
        buf[BLOCK_SIZE - 3] = 2;
        assert_eq!(pkcs7_unpad(&buf), Err(Error::InvalidPadding));

        assert_eq!(pkcs7_unpad(&[]), Err(Error::InvalidPadding));
        assert_eq!(pkcs7_unpad(&[4, 4, 4]), Err(Error::InvalidPadding));
    }

    #[test]
    fn test_cbc_round_trip() {
        let key = generate_aes_key();
        let plaintext = get_random_bytes(4 * BLOCK_SIZE);

        let ct1 = cbc_encrypt(&key, &plaintext).unwrap();
        let ct2 = cbc_encrypt(&key, &plaintext).unwrap();
        assert_eq!(ct1.len(), BLOCK_SIZE + plaintext.len());
        assert_ne!(ct1, ct2, "random IVs should make ciphertexts differ");

        assert_eq!(cbc_decrypt(&key, &ct1).unwrap(), plaintext);
        assert_eq!(cbc_decrypt(&key, &ct2).unwrap(), plaintext);

        // Other key sizes.
        for len in [16, 24] {
            let key = get_random_bytes(len);
            let ct = cbc_encrypt(&key, &plaintext).unwrap();
            assert_eq!(cbc_decrypt(&key, &ct).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_cbc_invalid_input() {
        let key = generate_aes_key();

        assert!(matches!(
            cbc_encrypt(&key, &[0u8; BLOCK_SIZE + 1]),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            cbc_decrypt(&key, &[0u8; BLOCK_SIZE - 1]),
            Err(Error::CiphertextTooShort)
        );
        assert!(matches!(
            cbc_decrypt(&key, &[0u8; BLOCK_SIZE + 3]),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            cbc_encrypt(&[0u8; 17], &[0u8; BLOCK_SIZE]),
            Err(Error::InvalidKeyParameter)
        );

        // An IV alone decrypts to nothing.
        assert_eq!(cbc_decrypt(&key, &[0u8; BLOCK_SIZE]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_cbc_pkcs7_round_trip() {
        let key = generate_aes_key();
        for len in [0, 1, 15, 16, 17, 100] {
            let plaintext = get_random_bytes(len);
            let ct = cbc_pkcs7_encrypt(&key, &plaintext).unwrap();
            assert_eq!(cbc_pkcs7_decrypt(&key, &ct).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_padding_tamper_detection() {
        let key = generate_aes_key();
        let mut failures = 0;
        let rounds = 64;

        for _ in 0..rounds {
            let plaintext = get_random_bytes(21);
            let ct = cbc_encrypt(&key, &pkcs7_pad(&plaintext)).unwrap();
            let mut padded = cbc_decrypt(&key, &ct).unwrap();

            let last = padded.len() - 1;
            padded[last] ^= 0xff;
            if pkcs7_unpad(&padded) == Err(Error::InvalidPadding) {
                failures += 1;
            }
        }

        // The flipped byte is always out of range for this padding length.
        assert_eq!(failures, rounds);
    }
}
