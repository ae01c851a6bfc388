use bip39::Mnemonic;
use cchain_core::{Address, ChainError, CryptoProvider, Hash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

pub fn generate_ed25519() -> KeyMaterial {
    let mut csprng = OsRng;
    let signing = SigningKey::generate(&mut csprng);
    let verify = signing.verifying_key();
    KeyMaterial {
        public_key: verify.to_bytes().to_vec(),
        secret_key: signing.to_bytes().to_vec(),
    }
}

/// Derive an ed25519 keypair from a BIP-39 mnemonic: the first 32 bytes of
/// the 64-byte PBKDF2 seed (empty passphrase) become the signing key's seed.
pub fn keypair_from_mnemonic(phrase: &str) -> Result<KeyMaterial, ChainError> {
    let mnemonic = Mnemonic::parse_normalized(phrase).map_err(|_| ChainError::BadMnemonic)?;
    let seed = mnemonic.to_seed("");
    let mut seed32 = [0u8; 32];
    seed32.copy_from_slice(&seed[..32]);
    let signing = SigningKey::from_bytes(&seed32);
    let verify = signing.verifying_key();
    Ok(KeyMaterial {
        public_key: verify.to_bytes().to_vec(),
        secret_key: signing.to_bytes().to_vec(),
    })
}

pub struct DefaultCryptoProvider;

impl DefaultCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultCryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    /// An address IS the raw public key, hex-rendered at the serialization
    /// boundary — no hashing. Copying the bytes straight across is what lets
    /// `verify_signature` recover the verifying key from `from` alone.
    fn address_from_public_key(&self, pk: &[u8]) -> Result<Address, ChainError> {
        if pk.len() != 32 {
            return Err(ChainError::BadAddress);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        Ok(Address(out))
    }

    fn verify_signature(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool, ChainError> {
        let pk_arr: [u8; 32] = pk.try_into().map_err(|_| ChainError::InvalidSignature)?;
        let vk = VerifyingKey::from_bytes(&pk_arr).map_err(|_| ChainError::InvalidSignature)?;
        let sig_arr: [u8; SIGNATURE_LENGTH] = sig.try_into().map_err(|_| ChainError::InvalidSignature)?;
        let signature = Signature::from_bytes(&sig_arr);
        Ok(vk.verify(msg, &signature).is_ok())
    }

    fn sign_message(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>, ChainError> {
        let sk_arr: [u8; 32] = sk.try_into().map_err(|_| ChainError::InvalidSignature)?;
        let signing = SigningKey::from_bytes(&sk_arr);
        let sig = signing.sign(msg);
        Ok(sig.to_bytes().to_vec())
    }

    fn hash_bytes(&self, data: &[u8]) -> Hash {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
}

/// Merkle root over transaction ids, duplicating the LAST element of an odd
/// level rather than the first (a documented deviation from both the
/// teacher and the Go original, which duplicate the first).
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        level = level.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
    }
    level[0]
}
