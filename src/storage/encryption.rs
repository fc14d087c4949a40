//! Simulated encryption of file content.
//!
//! Not cryptography: a reversible XOR transform that lets encrypted files
//! read back differently from their plain content.

const KEY: &[u8] = b"mockfs:simulated-encryption:v1";

/// Applies the transform. Applying it twice restores the input.
pub fn xor_transform(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .zip(KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

pub fn encrypt(bytes: &[u8]) -> Vec<u8> {
    xor_transform(bytes)
}

pub fn decrypt(bytes: &[u8]) -> Vec<u8> {
    xor_transform(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_restores_content() {
        let samples: [&[u8]; 4] = [b"", b"a", b"hello world", &[0u8, 255, 7, 128, 64, 32, 1, 2, 3]];
        for sample in samples {
            assert_eq!(decrypt(&encrypt(sample)), sample);
        }
    }

    #[test]
    fn test_encrypt_changes_every_byte() {
        let plain: Vec<u8> = (0..=255u8).chain(0..=255u8).collect();
        let encrypted = encrypt(&plain);
        assert_eq!(encrypted.len(), plain.len());
        assert!(plain.iter().zip(&encrypted).all(|(p, e)| p != e));
    }

    #[test]
    fn test_key_has_no_zero_bytes() {
        assert!(KEY.iter().all(|k| *k != 0));
    }
}
