use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use cchain_contracts::{ChainContext, ContractError, ContractRegistry};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub type Amount = u64;
pub type Timestamp = i64;
pub type Nonce = u64;
pub type Height = u64;

/// 32-byte raw public key, hex-rendered at every serialization boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 32]);

/// 32-byte SHA-256 digest, hex-rendered at every serialization boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

macro_rules! hex_newtype {
    ($ty:ident) => {
        impl $ty {
            pub const ZERO: $ty = $ty([0u8; 32]);

            pub fn from_hex(s: &str) -> Result<Self, ChainError> {
                let bytes = hex::decode(s).map_err(|_| ChainError::BadAddress)?;
                if bytes.len() != 32 {
                    return Err(ChainError::BadAddress);
                }
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok($ty(out))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.to_hex())
            }
        }

        impl FromStr for $ty {
            type Err = ChainError;

            fn from_str(s: &str) -> Result<Self, ChainError> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(Address);
hex_newtype!(Hash);

/// Error taxonomy per the error-handling design: four kinds (input, state,
/// crypto, consensus) plus storage, grouped in one enum since every layer
/// from mempool admission through the driver propagates the same type.
#[derive(Debug, Error)]
pub enum ChainError {
    // Input errors
    #[error("malformed mnemonic")]
    BadMnemonic,
    #[error("malformed address")]
    BadAddress,
    #[error("malformed contract payload: {0}")]
    BadPayload(String),
    #[error("nonce out of order")]
    BadNonce,
    #[error("fee below the configured floor")]
    FeeTooLow,

    // State errors
    #[error("sender account does not exist")]
    UnknownSender,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient stake")]
    InsufficientStake,
    #[error("mempool is full")]
    MempoolFull,
    #[error("unknown address")]
    UnknownAddress,

    // Crypto errors
    #[error("signature verification failed")]
    InvalidSignature,

    // Consensus errors
    #[error("previous-hash mismatch")]
    InvalidPrevHash,
    #[error("unexpected block height")]
    InvalidHeight,
    #[error("timestamp outside allowed drift")]
    InvalidTimestamp,
    #[error("block violates the Proof-of-Cooperation timing rule")]
    ConsensusViolation,
    #[error("recomputed tx_root does not match header")]
    MerkleMismatch,
    #[error("recomputed state_root does not match header")]
    StateRootMismatch,

    // Storage errors
    #[error("snapshot I/O error: {0}")]
    SnapshotIO(String),
    #[error("snapshot file is corrupt")]
    CorruptFile,

    // Dispatcher-facing, not in the core four-kind taxonomy but needed by
    // the library surface (call_proto_contract, submit_tx).
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    #[error("transaction rejected: {0}")]
    TxInvalid(Box<ChainError>),
}

impl From<ContractError> for ChainError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::UnknownContract(name) => ChainError::UnknownContract(name),
            ContractError::BadPayload(reason) => ChainError::BadPayload(reason),
            ContractError::Execution(reason) => ChainError::BadPayload(reason),
        }
    }
}

/// One documented canonical byte representation, used for every hash and
/// every signature: struct field order as declared, map keys sorted
/// lexicographically. Round-tripping through `serde_json::Value` (a
/// `BTreeMap`-backed object without the `preserve_order` feature) is what
/// gives us sorted keys for free instead of hand-rolling a binary codec.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    let as_value = serde_json::to_value(value).map_err(|e| ChainError::BadPayload(e.to_string()))?;
    serde_json::to_vec(&as_value).map_err(|e| ChainError::BadPayload(e.to_string()))
}

/// `hash_bytes`/`sign`/`verify` live behind this trait so `cchain-core` never
/// depends on a concrete crypto backend; `cchain-crypto::DefaultCryptoProvider`
/// is the implementation used everywhere outside tests.
pub trait CryptoProvider: Send + Sync {
    fn address_from_public_key(&self, pk: &[u8]) -> Result<Address, ChainError>;
    fn verify_signature(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool, ChainError>;
    fn sign_message(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>, ChainError>;
    fn hash_bytes(&self, data: &[u8]) -> Hash;
}

pub fn hash_canonical<T: Serialize>(crypto: &dyn CryptoProvider, value: &T) -> Result<Hash, ChainError> {
    Ok(crypto.hash_bytes(&canonical_bytes(value)?))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub balance: Amount,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub stake: Amount,
    pub locked_until: Height,
    pub rating: u64,
    pub slash_count: u32,
    pub active: bool,
}

impl ValidatorInfo {
    /// The single eligibility predicate used by consensus (§4.6 point 3):
    /// `active` is a cached snapshot of this, refreshed whenever stake or
    /// slash_count change.
    pub fn is_eligible(&self, min_stake: Amount) -> bool {
        self.stake >= min_stake && self.slash_count < 3
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Supply {
    pub total_supply: Amount,
    pub circulating: Amount,
    pub burned: Amount,
    pub fee_pool: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionRules {
    pub validator_share_bps: u16,
    pub coop_share_bps: u16,
}

impl Default for DistributionRules {
    fn default() -> Self {
        Self {
            validator_share_bps: 7_000,
            coop_share_bps: 3_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeTreasury {
    pub balance: Amount,
    pub distribution_rules: DistributionRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalState {
    Open,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub kind: String,
    pub target: String,
    pub payload_bytes: Vec<u8>,
    pub votes: HashMap<Address, bool>,
    pub state: ProposalState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoopRules {
    pub quorum_percent: u8,
    pub vote_duration_blocks: u64,
}

impl Default for CoopRules {
    fn default() -> Self {
        Self {
            quorum_percent: 50,
            vote_duration_blocks: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Coop {
    pub name: String,
    pub members: Vec<Address>,
    pub treasury: Amount,
    pub rules: CoopRules,
    pub description: String,
}

/// A soul-bound badge, carried from `original_source`'s `State.SoulBound`
/// purely so the persisted file layout's key set stays complete; no
/// operation in this spec mutates it beyond round-tripping on save/load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoulBoundBadge {
    pub id: String,
    pub issued_at: Timestamp,
}

pub type SoulBoundSet = Vec<SoulBoundBadge>;

/// Decoded form of a transaction's `payload`: a named protocol-contract
/// invocation. Encoded into `Transaction.payload` as canonical JSON bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractInvocation {
    pub contract: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: Nonce,
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct TxSigningView<'a> {
    from: &'a Address,
    to: &'a Address,
    amount: Amount,
    fee: Amount,
    nonce: Nonce,
    payload: &'a Option<Vec<u8>>,
}

impl Transaction {
    /// `Id = SHA-256 of canonical encoding with signature omitted` — the
    /// signature field is omitted by construction here rather than zeroed,
    /// since `TxSigningView` never has a signature field to begin with.
    pub fn compute_id(&self, crypto: &dyn CryptoProvider) -> Result<Hash, ChainError> {
        let view = TxSigningView {
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            payload: &self.payload,
        };
        hash_canonical(crypto, &view)
    }

    /// `signature = Ed25519(id, priv_from)`: `from` IS the raw verifying
    /// key, so verification needs nothing beyond the transaction itself.
    pub fn verify_signature(&self, crypto: &dyn CryptoProvider) -> Result<(), ChainError> {
        if !crypto.verify_signature(self.from.as_bytes(), self.id.as_bytes(), &self.signature)? {
            return Err(ChainError::InvalidSignature);
        }
        Ok(())
    }

    pub fn decode_payload(&self) -> Result<Option<ContractInvocation>, ChainError> {
        match &self.payload {
            None => Ok(None),
            Some(bytes) => {
                let invocation: ContractInvocation =
                    serde_json::from_slice(bytes).map_err(|e| ChainError::BadPayload(e.to_string()))?;
                Ok(Some(invocation))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: Height,
    pub prev_hash: Hash,
    pub tx_root: Hash,
    pub state_root: Hash,
    pub timestamp: Timestamp,
    pub proposer: Address,
    /// Reserved extensibility point for consensus metadata; unused by
    /// Proof-of-Cooperation (single-proposer, no vote aggregation to carry).
    pub consensus_data: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct HeaderSigningView<'a> {
    height: Height,
    prev_hash: &'a Hash,
    tx_root: &'a Hash,
    state_root: &'a Hash,
    timestamp: Timestamp,
    proposer: &'a Address,
    consensus_data: &'a [u8],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<Transaction>,
}

impl Block {
    /// `Block hash = SHA-256 of canonical header encoding with signature
    /// omitted`.
    pub fn compute_hash(&self, crypto: &dyn CryptoProvider) -> Result<Hash, ChainError> {
        let view = HeaderSigningView {
            height: self.header.height,
            prev_hash: &self.header.prev_hash,
            tx_root: &self.header.tx_root,
            state_root: &self.header.state_root,
            timestamp: self.header.timestamp,
            proposer: &self.header.proposer,
            consensus_data: &self.header.consensus_data,
        };
        hash_canonical(crypto, &view)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainMeta {
    pub height: Height,
    pub last_block_hash: Hash,
    pub tx_root: Hash,
    pub state_root: Hash,
    pub timestamp: Timestamp,
}

impl Default for ChainMeta {
    fn default() -> Self {
        Self {
            height: 0,
            last_block_hash: Hash::ZERO,
            tx_root: Hash::ZERO,
            state_root: Hash::ZERO,
            timestamp: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub height: Height,
    pub result: String,
}

/// Non-canonical bookkeeping excluded from the state-root hash: a ring of
/// recent block hashes and a receipt index for `call_proto_contract`
/// results. Grounded on `original_source`'s `RuntimeCache{RecentBlocks,
/// TxIndex}`, which the spec's own glossary calls out as excluded.
#[derive(Debug, Clone, Default)]
pub struct RuntimeCache {
    pub recent_blocks: Vec<Hash>,
    pub tx_index: HashMap<Hash, TxReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldState {
    pub chain_meta: ChainMeta,
    pub supply: Supply,
    pub accounts: HashMap<Address, Account>,
    pub validators: HashMap<Address, ValidatorInfo>,
    pub coops_registry: HashMap<String, Coop>,
    pub governance: HashMap<String, Proposal>,
    pub soul_bound: HashMap<Address, SoulBoundSet>,
    pub contracts_storage: HashMap<String, HashMap<String, Vec<u8>>>,
    pub fee_treasury: FeeTreasury,
    pub blocks: Vec<Block>,
    #[serde(skip)]
    pub cache: RuntimeCache,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            chain_meta: ChainMeta::default(),
            supply: Supply::default(),
            accounts: HashMap::new(),
            validators: HashMap::new(),
            coops_registry: HashMap::new(),
            governance: HashMap::new(),
            soul_bound: HashMap::new(),
            contracts_storage: HashMap::new(),
            fee_treasury: FeeTreasury::default(),
            blocks: Vec::new(),
            cache: RuntimeCache::default(),
        }
    }
}

impl WorldState {
    pub fn get_account(&self, addr: &Address) -> Option<&Account> {
        self.accounts.get(addr)
    }

    pub fn get_balance(&self, addr: &Address) -> Amount {
        self.accounts.get(addr).map(|a| a.balance).unwrap_or(0)
    }

    /// `state_root = SHA-256 of canonical encoding of the WorldState`
    /// (`cache` is `#[serde(skip)]`, so it is already excluded here).
    pub fn state_root(&self, crypto: &dyn CryptoProvider) -> Result<Hash, ChainError> {
        hash_canonical(crypto, self)
    }

    /// Unconditional credit, used by genesis construction where the sender
    /// is the "GENESIS" pseudo-account and does not go through
    /// `apply_transaction`'s admission preconditions.
    pub fn credit(&mut self, addr: Address, amount: Amount) -> Result<(), ChainError> {
        let entry = self.accounts.entry(addr).or_default();
        entry.balance = entry.balance.checked_add(amount).ok_or(ChainError::InsufficientBalance)?;
        Ok(())
    }

    /// The only mutator besides block append and staking changes (§4.3).
    /// Preconditions are checked in the declared order; on any failure the
    /// state is left byte-identical.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        crypto: &dyn CryptoProvider,
        registry: &ContractRegistry,
        min_fee: Amount,
    ) -> Result<(), ChainError> {
        tx.verify_signature(crypto)?;
        let sender = self.accounts.get(&tx.from).cloned().ok_or(ChainError::UnknownSender)?;
        if tx.nonce != sender.nonce + 1 {
            return Err(ChainError::BadNonce);
        }
        let total = tx
            .amount
            .checked_add(tx.fee)
            .ok_or(ChainError::InsufficientBalance)?;
        if sender.balance < total {
            return Err(ChainError::InsufficientBalance);
        }
        if tx.fee < min_fee {
            return Err(ChainError::FeeTooLow);
        }
        let invocation = tx.decode_payload()?;

        let sender_entry = self.accounts.get_mut(&tx.from).expect("checked above");
        sender_entry.balance -= total;
        sender_entry.nonce += 1;

        let receiver = self.accounts.entry(tx.to).or_default();
        receiver.balance = receiver
            .balance
            .checked_add(tx.amount)
            .ok_or(ChainError::InsufficientBalance)?;

        self.fee_treasury.balance += tx.fee;
        self.supply.fee_pool += tx.fee;

        if let Some(invocation) = invocation {
            registry.dispatch(&invocation.contract, self, &invocation.params)?;
        }

        Ok(())
    }

    /// Copy-on-mutate: every transaction in `block.body` must apply for the
    /// block to be committed; any single failure rolls the whole attempt
    /// back (the caller's `self` is left untouched).
    pub fn apply_block(
        &mut self,
        block: &Block,
        crypto: &dyn CryptoProvider,
        registry: &ContractRegistry,
        min_fee: Amount,
    ) -> Result<(), ChainError> {
        let mut scratch = self.clone();
        for tx in &block.body {
            scratch.apply_transaction(tx, crypto, registry, min_fee)?;
        }
        scratch.chain_meta.height = block.header.height;
        scratch.chain_meta.last_block_hash = block.compute_hash(crypto)?;
        scratch.chain_meta.tx_root = block.header.tx_root;
        scratch.chain_meta.timestamp = block.header.timestamp;
        scratch.blocks.push(block.clone());
        scratch.chain_meta.state_root = scratch.state_root(crypto)?;
        *self = scratch;
        Ok(())
    }

    /// Move `amount` from the account's balance to `ValidatorInfo.stake`.
    pub fn stake_lock(&mut self, addr: Address, amount: Amount, locked_until: Height) -> Result<(), ChainError> {
        let balance = self.accounts.get(&addr).map(|a| a.balance).unwrap_or(0);
        if balance < amount {
            return Err(ChainError::InsufficientBalance);
        }
        self.accounts.get_mut(&addr).expect("checked above").balance -= amount;
        let validator = self.validators.entry(addr).or_default();
        validator.stake += amount;
        validator.locked_until = locked_until;
        validator.active = true;
        Ok(())
    }

    /// Credit the validator and bump supply bookkeeping.
    pub fn reward(&mut self, addr: Address, amount: Amount) -> Result<(), ChainError> {
        self.credit(addr, amount)?;
        self.supply.total_supply = self.supply.total_supply.checked_add(amount).unwrap_or(u64::MAX);
        self.supply.circulating = self.supply.circulating.checked_add(amount).unwrap_or(u64::MAX);
        Ok(())
    }
}

impl ChainContext for WorldState {
    fn create_coop(&mut self, creator: &str, name: &str, description: &str) -> Result<(), ContractError> {
        let creator_addr =
            Address::from_hex(creator).map_err(|_| ContractError::BadPayload("bad creator address".into()))?;
        if self.coops_registry.contains_key(name) {
            return Err(ContractError::Execution(format!("coop '{name}' already exists")));
        }
        self.coops_registry.insert(
            name.to_string(),
            Coop {
                name: name.to_string(),
                members: vec![creator_addr],
                treasury: 0,
                rules: CoopRules::default(),
                description: description.to_string(),
            },
        );
        Ok(())
    }

    fn record_vote(
        &mut self,
        voter: &str,
        coop_id: &str,
        proposal_id: &str,
        choice: bool,
    ) -> Result<(), ContractError> {
        let voter_addr =
            Address::from_hex(voter).map_err(|_| ContractError::BadPayload("bad voter address".into()))?;
        if !self.coops_registry.contains_key(coop_id) {
            return Err(ContractError::Execution(format!("unknown coop '{coop_id}'")));
        }
        let proposal = self.governance.entry(proposal_id.to_string()).or_insert_with(|| Proposal {
            kind: "generic".to_string(),
            target: coop_id.to_string(),
            payload_bytes: Vec::new(),
            votes: HashMap::new(),
            state: ProposalState::Open,
        });
        if proposal.state != ProposalState::Open {
            return Err(ContractError::Execution("proposal is not open".into()));
        }
        proposal.votes.insert(voter_addr, choice);

        let coop = &self.coops_registry[coop_id];
        let yes = proposal.votes.values().filter(|v| **v).count();
        let total_members = coop.members.len().max(1);
        if yes * 100 >= coop.rules.quorum_percent as usize * total_members {
            proposal.state = ProposalState::Accepted;
        }
        Ok(())
    }

    fn issue_token(&mut self, issuer: &str, amount: u64, symbol: &str) -> Result<(), ContractError> {
        let issuer_addr =
            Address::from_hex(issuer).map_err(|_| ContractError::BadPayload("bad issuer address".into()))?;
        self.credit(issuer_addr, amount)
            .map_err(|e| ContractError::Execution(e.to_string()))?;
        self.supply.total_supply = self.supply.total_supply.saturating_add(amount);
        self.supply.circulating = self.supply.circulating.saturating_add(amount);
        let ledger = self.contracts_storage.entry("IssueToken".to_string()).or_default();
        let prior = ledger
            .get(symbol)
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0);
        ledger.insert(symbol.to_string(), (prior + amount).to_le_bytes().to_vec());
        Ok(())
    }
}
