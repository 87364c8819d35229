//! Account addresses and the hash/signature primitives behind them.
//!
//! A public-key hash is a keyed BLAKE2b-160 over nested SHA-3/SHA-2
//! digests; the textual account address is `<prefix>:<base58(pkh ∥
//! checksum4)>` with a double-hash checksum. Multi-signature accounts
//! prepend the required/total ratio to the ordered member hash list before
//! hashing.

use blake2::digest::consts::{U20, U32, U48};
use blake2::digest::{KeyInit, Mac};
use blake2::{Blake2b, Blake2b512, Blake2bMac, Blake2bVar, Digest as _};
use blake2::digest::{Update, VariableOutput};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::error::ExecError;

/// 160-bit digest length in bytes.
pub const SIZE160: usize = 20;
/// 224-bit digest length in bytes.
pub const SIZE224: usize = 28;

/// Separator between the address prefix and the Base58 body.
pub const DELIMITER: char = ':';

/// Upper bound on multi-signature member count.
pub const MUL_SIG_MAX: usize = 0xff;

type Blake2b160Mac = Blake2bMac<U20>;
type Blake2b256 = Blake2b<U32>;
type Blake2b384 = Blake2b<U48>;

/// Keyed BLAKE2b-160 with an optional prefix prepended to the digest.
pub fn blake_sum_160(data: &[u8], key: &[u8], prefix: &[u8]) -> Vec<u8> {
    let mut mac: Blake2b160Mac =
        KeyInit::new_from_slice(key).expect("blake2b key length is controlled here");
    Mac::update(&mut mac, data);
    let digest = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(prefix.len() + SIZE160);
    out.extend_from_slice(prefix);
    out.extend_from_slice(&digest);
    out
}

/// Unkeyed BLAKE2b-224.
pub fn blake_sum_224(data: &[u8]) -> Vec<u8> {
    let mut h = Blake2bVar::new(SIZE224).expect("224-bit output is valid for blake2b");
    Update::update(&mut h, data);
    let mut out = vec![0u8; SIZE224];
    h.finalize_variable(&mut out)
        .expect("output buffer sized above");
    out
}

/// Unkeyed BLAKE2b-256.
pub fn blake_sum_256(data: &[u8]) -> [u8; 32] {
    let mut h = Blake2b256::new();
    Digest::update(&mut h, data);
    h.finalize().into()
}

/// Unkeyed BLAKE2b-384.
pub fn blake_sum_384(data: &[u8]) -> [u8; 48] {
    let mut h = Blake2b384::new();
    Digest::update(&mut h, data);
    h.finalize().into()
}

/// Unkeyed BLAKE2b-512.
pub fn blake_sum_512(data: &[u8]) -> [u8; 64] {
    let mut h = Blake2b512::new();
    Digest::update(&mut h, data);
    h.finalize().into()
}

/// 160-bit digest used for hash-mode pattern matching: BLAKE2b keyed with
/// the leading 20 bytes of the payload's SHA-256.
///
/// `ver` selects the construction so it can be rotated by protocol
/// version; version 1 is the only one defined.
pub fn sum160(ver: u32, data: &[u8]) -> Vec<u8> {
    let _ = ver;
    let k = Sha256::digest(data);
    blake_sum_160(data, &k[..SIZE160], &[])
}

/// Public-key hash: BLAKE2b-160 of `sha3(pubkey)` keyed with the leading
/// 20 bytes of `sha256(sha3(pubkey))`. `prefix` is prepended verbatim to
/// the result (used by multi-signature ratios).
pub fn pub_key_hash(pubkey: &[u8], prefix: &[u8]) -> Vec<u8> {
    let h = Sha3_256::digest(pubkey);
    let k = Sha256::digest(&h);
    blake_sum_160(&h, &k[..SIZE160], prefix)
}

/// Multi-signature total address.
///
/// `pks` are position-prefixed public keys of the signers; `pkhs` are
/// position-prefixed 20-byte hashes of the remaining members. Every
/// position in `0..total` must be covered exactly once. The result is
/// `(n, t) ∥ hash20` where the hash covers `(n, t)` plus the ordered
/// member hash list.
pub fn mul_hash(pks: &[Vec<u8>], pkhs: &[Vec<u8>]) -> Result<Vec<u8>, ExecError> {
    let n = pks.len();
    let total = n + pkhs.len();
    if total > MUL_SIG_MAX {
        return Err(ExecError::MulSigSize);
    }

    let mut all: Vec<Option<Vec<u8>>> = vec![None; total];
    for pk in pks {
        if pk.is_empty() {
            return Err(ExecError::MulSigIndex);
        }
        let slot = all
            .get_mut(pk[0] as usize)
            .ok_or(ExecError::MulSigIndex)?;
        *slot = Some(pub_key_hash(&pk[1..], &[]));
    }
    for pkh in pkhs {
        if pkh.is_empty() {
            return Err(ExecError::MulSigIndex);
        }
        let slot = all
            .get_mut(pkh[0] as usize)
            .ok_or(ExecError::MulSigIndex)?;
        *slot = Some(pkh[1..].to_vec());
    }

    let ratio = [n as u8, total as u8];
    let mut buf = Vec::with_capacity(2 + total * SIZE160);
    buf.extend_from_slice(&ratio);
    for slot in all {
        let pkh = slot.ok_or(ExecError::MulSigIndex)?;
        buf.extend_from_slice(&pkh);
    }
    Ok(pub_key_hash_raw(&buf, &ratio))
}

// Same keyed construction as `pub_key_hash`, applied to arbitrary bytes.
fn pub_key_hash_raw(data: &[u8], prefix: &[u8]) -> Vec<u8> {
    let h = Sha3_256::digest(data);
    let k = Sha256::digest(&h);
    blake_sum_160(&h, &k[..SIZE160], prefix)
}

/// Encodes a public-key hash as a textual account address.
pub fn encode(pkh: &[u8], prefix: &str) -> String {
    let mut preimage = Vec::with_capacity(prefix.len() + pkh.len());
    preimage.extend_from_slice(prefix.as_bytes());
    preimage.extend_from_slice(pkh);
    let sum = checksum(&preimage);

    let mut body = Vec::with_capacity(pkh.len() + 4);
    body.extend_from_slice(pkh);
    body.extend_from_slice(&sum);

    let mut out = String::with_capacity(prefix.len() + 1 + body.len() * 2);
    out.push_str(prefix);
    out.push(DELIMITER);
    out.push_str(&bs58::encode(body).into_string());
    out
}

/// Decodes a textual account address back to `(pkh, prefix)`, validating
/// the checksum.
pub fn decode(addr: &str) -> Result<(Vec<u8>, String), ExecError> {
    let (prefix, body) = addr
        .split_once(DELIMITER)
        .ok_or(ExecError::DelimiterMissing)?;

    let bytes = bs58::decode(body)
        .into_vec()
        .map_err(|_| ExecError::AddressFormat)?;
    if bytes.len() < 5 {
        return Err(ExecError::AddressFormat);
    }
    let (pkh, sum) = bytes.split_at(bytes.len() - 4);

    let mut preimage = Vec::with_capacity(prefix.len() + pkh.len());
    preimage.extend_from_slice(prefix.as_bytes());
    preimage.extend_from_slice(pkh);
    if checksum(&preimage) != sum {
        return Err(ExecError::Checksum);
    }
    Ok((pkh.to_vec(), prefix.to_string()))
}

// Last four bytes of blake2b256(sha256(prefix ∥ pkh)).
fn checksum(preimage: &[u8]) -> [u8; 4] {
    let h1 = Sha256::digest(preimage);
    let h2 = blake_sum_256(&h1);
    let mut out = [0u8; 4];
    out.copy_from_slice(&h2[h2.len() - 4..]);
    out
}

/// Single ed25519 signature verification. Malformed keys or signatures
/// verify as false.
///
/// `ver` selects the scheme for future rotation; version 1 is ed25519.
pub fn check_sig(ver: u32, pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool {
    let _ = ver;
    let Ok(key_bytes) = <&[u8; 32]>::try_from(pubkey) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig) else {
        return false;
    };
    vk.verify(msg, &signature).is_ok()
}

/// Verifies one signature per public key over the same message.
pub fn check_sigs(ver: u32, pubkeys: &[Vec<u8>], msg: &[u8], sigs: &[Vec<u8>]) -> bool {
    pubkeys.len() == sigs.len()
        && pubkeys
            .iter()
            .zip(sigs)
            .all(|(pk, sig)| check_sig(ver, pk, msg, sig))
}

/// Splits position-prefixed public keys into the position list and the
/// bare keys.
pub fn mul_pub_keys(pbks: &[Vec<u8>]) -> (Vec<u8>, Vec<Vec<u8>>) {
    let mut ids = Vec::with_capacity(pbks.len());
    let mut pks = Vec::with_capacity(pbks.len());
    for pk in pbks {
        ids.push(pk[0]);
        pks.push(pk[1..].to_vec());
    }
    (ids, pks)
}

/// Built-in single-signature spend check: the hash of `pubkey` must equal
/// the payer's public-key address, and `sig` must verify over `msg`.
pub fn single_check(ver: u32, pubkey: &[u8], msg: &[u8], sig: &[u8], pkaddr: &[u8]) -> bool {
    pub_key_hash(pubkey, &[]) == pkaddr && check_sig(ver, pubkey, msg, sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn address_roundtrip() {
        let pkh = pub_key_hash(b"some public key", &[]);
        let addr = encode(&pkh, "cx");
        let (got, prefix) = decode(&addr).unwrap();
        assert_eq!(got, pkh);
        assert_eq!(prefix, "cx");
    }

    #[test]
    fn corrupt_checksum_is_rejected(){
        let pkh = pub_key_hash(b"key", &[]);
        let mut addr = encode(&pkh, "cx");
        // Flip the final Base58 character to a different valid one.
        let last = addr.pop().unwrap();
        addr.push(if last == '2' { '3' } else { '2' });
        assert!(matches!(
            decode(&addr),
            Err(ExecError::Checksum) | Err(ExecError::AddressFormat)
        ));
    }

    #[test]
    fn pub_key_hash_is_twenty_bytes() {
        assert_eq!(pub_key_hash(&[7u8; 32], &[]).len(), SIZE160);
        assert_eq!(pub_key_hash(&[7u8; 32], &[2, 3]).len(), SIZE160 + 2);
    }

    #[test]
    fn mul_hash_orders_members_by_position() {
        let k0 = vec![9u8; 32];
        let k1 = vec![8u8; 32];
        let k2 = vec![7u8; 32];

        let mut pk0 = vec![0u8];
        pk0.extend_from_slice(&k0);
        let mut pk1 = vec![1u8];
        pk1.extend_from_slice(&k1);
        let mut pkh2 = vec![2u8];
        pkh2.extend_from_slice(&pub_key_hash(&k2, &[]));

        let total = mul_hash(&[pk0, pk1], &[pkh2]).unwrap();
        assert_eq!(&total[..2], &[2, 3]);
        assert_eq!(total.len(), 2 + SIZE160);

        // Recompute by hand: ratio ∥ ordered hashes, keyed hash, ratio prefix.
        let mut buf = vec![2u8, 3u8];
        buf.extend_from_slice(&pub_key_hash(&k0, &[]));
        buf.extend_from_slice(&pub_key_hash(&k1, &[]));
        buf.extend_from_slice(&pub_key_hash(&k2, &[]));
        assert_eq!(total, pub_key_hash(&buf, &[2, 3]));
    }

    #[test]
    fn mul_hash_rejects_position_gaps() {
        let mut pk = vec![1u8];
        pk.extend_from_slice(&[4u8; 32]);
        // Position 0 is never covered.
        assert_eq!(mul_hash(&[pk], &[]), Err(ExecError::MulSigIndex));
    }

    #[test]
    fn signature_verification() {
        let sk = SigningKey::from_bytes(&[5u8; 32]);
        let vk = sk.verifying_key();
        let msg = b"spend message";
        let sig = sk.sign(msg);

        assert!(check_sig(1, vk.as_bytes(), msg, &sig.to_bytes()));
        assert!(!check_sig(1, vk.as_bytes(), b"other", &sig.to_bytes()));
        assert!(!check_sig(1, &[0u8; 5], msg, &sig.to_bytes()));
    }

    #[test]
    fn single_check_compares_the_address_first() {
        let sk = SigningKey::from_bytes(&[6u8; 32]);
        let vk = sk.verifying_key();
        let msg = b"m";
        let sig = sk.sign(msg).to_bytes();
        let pkaddr = pub_key_hash(vk.as_bytes(), &[]);

        assert!(single_check(1, vk.as_bytes(), msg, &sig, &pkaddr));
        assert!(!single_check(1, vk.as_bytes(), msg, &sig, &[0u8; 20]));
    }

    #[test]
    fn sum160_is_stable() {
        let a = sum160(1, b"data");
        let b = sum160(1, b"data");
        assert_eq!(a, b);
        assert_eq!(a.len(), SIZE160);
        assert_ne!(a, sum160(1, b"datb"));
    }
}
