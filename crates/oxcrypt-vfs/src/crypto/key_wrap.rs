#![forbid(unsafe_code)]

//! AES key wrapping as defined in [RFC 3394](https://datatracker.ietf.org/doc/html/rfc3394).
//!
//! Only AES-256 key encryption keys are supported; that is all the masterkey
//! file format ever uses.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::{
    GenericArray,
    sequence::Concat,
    typenum::{U8, U16},
};
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use zeroize::Zeroizing;

type Half = GenericArray<u8, U8>;
type Block = GenericArray<u8, U16>;

/// Default IV from RFC 3394 section 2.2.3.1.
const IV_3394: [u8; 8] = [0xa6; 8];

#[derive(Error, Debug)]
pub enum WrapError {
    #[error("The plaintext length is not a multiple of 64 bits per RFC3394.")]
    InvalidPlaintextLength,
}

#[derive(Error, Debug)]
pub enum UnwrapError {
    #[error("The ciphertext length is not a multiple of 64 bits per RFC3394.")]
    InvalidCiphertextLength,
    #[error("The ciphertext is shorter than the minimum of 128 bits.")]
    CiphertextTooShort,
    #[error("The integrity check failed.")]
    InvalidIntegrityCheck,
}

fn xor_counter(register: &mut Half, t: usize) {
    for (byte, counter) in register.iter_mut().zip((t as u64).to_be_bytes()) {
        *byte ^= counter;
    }
}

/// Wrap `plaintext` under the key encryption key `kek`.
pub fn wrap_key(plaintext: &[u8], kek: &SecretBox<[u8; 32]>) -> Result<Vec<u8>, WrapError> {
    if plaintext.is_empty() || plaintext.len() % 8 != 0 {
        return Err(WrapError::InvalidPlaintextLength);
    }

    let n_blocks = plaintext.len() / 8;
    let cipher = Aes256::new(kek.expose_secret().into());
    let mut integrity_check = Half::from(IV_3394);
    let mut registers = Zeroizing::new(plaintext.to_vec());

    for j in 0..6 {
        for (i, chunk) in registers.chunks_mut(8).enumerate() {
            let t = n_blocks * j + (i + 1);

            // B = AES(K, A | R[i])
            let mut block: Block = integrity_check.concat(*Half::from_slice(chunk));
            cipher.encrypt_block(&mut block);

            // A = MSB(64, B) ^ t; R[i] = LSB(64, B)
            integrity_check.copy_from_slice(&block[..8]);
            xor_counter(&mut integrity_check, t);
            chunk.copy_from_slice(&block[8..]);
        }
    }

    let mut ciphertext = integrity_check.to_vec();
    ciphertext.extend_from_slice(&registers);
    Ok(ciphertext)
}

/// Unwrap `ciphertext` with the key encryption key `kek`.
///
/// A wrong KEK surfaces as [`UnwrapError::InvalidIntegrityCheck`].
pub fn unwrap_key(
    ciphertext: &[u8],
    kek: &SecretBox<[u8; 32]>,
) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
    if ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if ciphertext.len() < 16 {
        return Err(UnwrapError::CiphertextTooShort);
    }

    let n_blocks = ciphertext.len() / 8 - 1;
    let cipher = Aes256::new(kek.expose_secret().into());
    let mut integrity_check = *Half::from_slice(&ciphertext[..8]);
    let mut registers = Zeroizing::new(ciphertext[8..].to_vec());

    for j in (0..6).rev() {
        for (i, chunk) in registers.chunks_mut(8).enumerate().rev() {
            let t = n_blocks * j + (i + 1);

            // B = AES-1(K, (A ^ t) | R[i])
            let mut a = integrity_check;
            xor_counter(&mut a, t);
            let mut block: Block = a.concat(*Half::from_slice(chunk));
            cipher.decrypt_block(&mut block);

            integrity_check.copy_from_slice(&block[..8]);
            chunk.copy_from_slice(&block[8..]);
        }
    }

    if integrity_check.as_slice() != IV_3394.as_slice() {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }

    Ok(registers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn kek(bytes: [u8; 32]) -> SecretBox<[u8; 32]> {
        SecretBox::new(Box::new(bytes))
    }

    const KEK: [u8; 32] = hex!("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F");

    #[test]
    fn test_wrap_128_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF");
        let expected = hex!("64E8C3F9CE0F5BA2 63E9777905818A2A 93C8191E7D6E8AE7");

        let wrapped = wrap_key(&key_data, &kek(KEK)).unwrap();
        assert_eq!(wrapped.as_slice(), &expected);
    }

    #[test]
    fn test_unwrap_256_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F");
        let ciphertext = hex!(
            "28C9F404C4B810F4 CBCCB35CFB87F826 3F5786E2D80ED326 CBC7F0E71A99F43B FB988B9B7A02DD21"
        );

        let unwrapped = unwrap_key(&ciphertext, &kek(KEK)).unwrap();
        assert_eq!(unwrapped.as_slice(), &key_data);
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails_integrity() {
        let ciphertext = hex!(
            "A8F9BC1612C68B3F F6E6F4FBE30E71E4 769C8B80A32CB895 8CD5D17D6B254DA1"
        );
        let wrong = hex!("36b0144a13d0b5c1950c435762ff47789ab64258763f6f980f66dc00c11697cd");

        assert!(matches!(
            unwrap_key(&ciphertext, &kek(wrong)),
            Err(UnwrapError::InvalidIntegrityCheck)
        ));
    }

    #[test]
    fn test_length_validation() {
        assert!(matches!(
            wrap_key(&[0u8; 12], &kek(KEK)),
            Err(WrapError::InvalidPlaintextLength)
        ));
        assert!(matches!(
            unwrap_key(&[0u8; 14], &kek(KEK)),
            Err(UnwrapError::InvalidCiphertextLength)
        ));
        assert!(matches!(
            unwrap_key(&[0u8; 8], &kek(KEK)),
            Err(UnwrapError::CiphertextTooShort)
        ));
    }
}
