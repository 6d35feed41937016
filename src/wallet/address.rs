// Base-58 address codec

use crate::core::hash256;
use crate::error::{Error, Result};

/// Version byte prefixed to every address payload
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;
const DECODED_LEN: usize = 1 + 20 + CHECKSUM_LEN;

/// First four bytes of the double digest of `version || pubkey_hash`
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = hash256(payload);
    let mut check = [0u8; CHECKSUM_LEN];
    check.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    check
}

/// Render a 20-byte public-key hash as a base-58 address:
/// base58(version || hash || checksum)
pub fn encode_address(pubkey_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(DECODED_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);

    let check = checksum(&payload);
    payload.extend_from_slice(&check);

    bs58::encode(payload).into_string()
}

/// Parse an address back to its public-key hash, verifying the checksum
pub fn decode_address(address: &str) -> Result<[u8; 20]> {
    let invalid = || Error::InvalidAddress(address.to_string());

    let data = bs58::decode(address).into_vec().map_err(|_| invalid())?;
    if data.len() != DECODED_LEN {
        return Err(invalid());
    }

    let (body, check) = data.split_at(DECODED_LEN - CHECKSUM_LEN);
    if body[0] != ADDRESS_VERSION || checksum(body)[..] != *check {
        return Err(invalid());
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Ok(hash)
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let hash = [0x5a; 20];
        let address = encode_address(&hash);
        assert_eq!(decode_address(&address).unwrap(), hash);
        assert!(validate_address(&address));
    }

    #[test]
    fn test_leading_zero_hash() {
        let mut hash = [0u8; 20];
        hash[19] = 1;
        let address = encode_address(&hash);

        // Version byte 0x00 maps to a leading '1' in the base-58 alphabet
        assert!(address.starts_with('1'));
        assert_eq!(decode_address(&address).unwrap(), hash);
    }

    #[test]
    fn test_corrupted_address_rejected() {
        let address = encode_address(&[0x5a; 20]);

        let mut corrupted: Vec<char> = address.chars().collect();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == '2' { '3' } else { '2' };
        let corrupted: String = corrupted.into_iter().collect();

        assert!(!validate_address(&corrupted));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address("abc"));
    }
}
