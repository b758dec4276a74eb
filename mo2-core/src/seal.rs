use sha2::{Digest, Sha256};

/// Length of the trailing container digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Compute the integrity digest over a byte range.
///
/// Stateless SHA-256; the builder seals `[0, hash_off)` of a container
/// with this and verification recomputes it over the same prefix.
pub fn seal(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_vector() {
        let digest = seal(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(seal(b"mo2"), seal(b"mo2"));
        assert_ne!(seal(b"mo2"), seal(b"mo3"));
    }
}
