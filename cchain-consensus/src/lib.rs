use std::sync::Arc;

use cchain_contracts::ContractRegistry;
use cchain_core::{
    Account, Address, Amount, Block, BlockHeader, ChainError, CryptoProvider, Hash, Height, Timestamp, Transaction,
    WorldState,
};
use cchain_crypto::merkle_root;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub validator: Address,
    pub genesis_address: Address,
    pub min_stake: Amount,
    pub min_validator_stake: Amount,
    pub genesis_reward: Amount,
    pub block_reward: Amount,
    pub max_timestamp_drift_secs: i64,
    pub auto_mine_interval_secs: i64,
    pub max_tx_per_block: u64,
}

/// Single-proposer Proof-of-Cooperation: no PoW nonce search, no random
/// validator selection, no vote quorum. The configured validator is the
/// only entity ever allowed to propose a block; a block is valid exactly
/// when the seven checks in `validate` all pass.
pub struct ProofOfCooperation<C: CryptoProvider> {
    crypto: Arc<C>,
    config: ConsensusConfig,
}

impl<C: CryptoProvider> ProofOfCooperation<C> {
    pub fn new(crypto: Arc<C>, config: ConsensusConfig) -> Self {
        Self { crypto, config }
    }

    /// Fixed genesis construction: `prev_hash = 0`, `height = 0`,
    /// `timestamp = 0`, one transaction `from = GENESIS`, crediting the
    /// validator with `genesis_reward` and locking `min_stake` of it as
    /// stake. The validator's nonce starts at 1, matching the genesis
    /// transaction's own `nonce` field, so the first real outgoing
    /// transaction from the validator uses `nonce = 2`.
    pub fn genesis(&self, validator_pk: &[u8]) -> Result<(Block, WorldState), ChainError> {
        let validator = self.crypto.address_from_public_key(validator_pk)?;
        let genesis_tx = Transaction {
            id: Hash::ZERO,
            from: self.config.genesis_address,
            to: validator,
            amount: self.config.genesis_reward,
            fee: 0,
            nonce: 1,
            payload: None,
            signature: Vec::new(),
        };
        let genesis_tx = Transaction {
            id: genesis_tx.compute_id(self.crypto.as_ref())?,
            ..genesis_tx
        };

        let mut state = WorldState::default();
        state.accounts.insert(validator, Account { balance: 0, nonce: 1 });
        state.reward(validator, self.config.genesis_reward)?;
        state.stake_lock(validator, self.config.min_stake, 0)?;

        let tx_root = merkle_root(&[genesis_tx.id]);
        let mut header = BlockHeader {
            height: 0,
            prev_hash: Hash::ZERO,
            tx_root,
            state_root: Hash::ZERO,
            timestamp: 0,
            proposer: validator,
            consensus_data: Vec::new(),
            signature: Vec::new(),
        };
        let block = Block {
            header: header.clone(),
            body: vec![genesis_tx],
        };
        header.state_root = state.state_root(self.crypto.as_ref())?;
        let block = Block { header, ..block };

        state.chain_meta.height = 0;
        state.chain_meta.last_block_hash = block.compute_hash(self.crypto.as_ref())?;
        state.chain_meta.tx_root = tx_root;
        state.chain_meta.state_root = state.state_root(self.crypto.as_ref())?;
        state.chain_meta.timestamp = 0;
        state.blocks.push(block.clone());

        Ok((block, state))
    }

    /// Build and sign the next block over `body`, applying it to a clone of
    /// `state_before` to derive `state_root`. Does not mutate `state_before`;
    /// the caller commits via `WorldState::apply_block` once accepted.
    pub fn produce(
        &self,
        prev: &Block,
        body: Vec<Transaction>,
        state_before: &WorldState,
        signing_key: &[u8],
        registry: &ContractRegistry,
        min_fee: Amount,
        now: Timestamp,
    ) -> Result<Block, ChainError> {
        let mut scratch = state_before.clone();
        for tx in &body {
            scratch.apply_transaction(tx, self.crypto.as_ref(), registry, min_fee)?;
        }
        let tx_ids: Vec<Hash> = body.iter().map(|t| t.id).collect();
        let tx_root = merkle_root(&tx_ids);
        let state_root = scratch.state_root(self.crypto.as_ref())?;

        let header = BlockHeader {
            height: prev.header.height + 1,
            prev_hash: prev.compute_hash(self.crypto.as_ref())?,
            tx_root,
            state_root,
            timestamp: now,
            proposer: self.config.validator,
            consensus_data: Vec::new(),
            signature: Vec::new(),
        };
        let block = Block { header, body };
        let digest = block.compute_hash(self.crypto.as_ref())?;
        let signature = self.crypto.sign_message(signing_key, digest.as_bytes())?;
        Ok(Block {
            header: BlockHeader { signature, ..block.header },
            ..block
        })
    }

    /// The seven-point validity predicate, checked in the declared order:
    /// prev-hash linkage, height, proposer eligibility, signature,
    /// timestamp drift, timeliness, and recomputed roots.
    pub fn validate(
        &self,
        block: &Block,
        prev: &Block,
        state_before: &WorldState,
        registry: &ContractRegistry,
        min_fee: Amount,
        now: Timestamp,
    ) -> Result<(), ChainError> {
        // 1. prev_hash linkage.
        let expected_prev_hash = prev.compute_hash(self.crypto.as_ref())?;
        if block.header.prev_hash != expected_prev_hash {
            return Err(ChainError::InvalidPrevHash);
        }
        // 2. height.
        if block.header.height != prev.header.height + 1 {
            return Err(ChainError::InvalidHeight);
        }
        // 3. proposer is a qualified validator.
        if block.header.proposer != self.config.validator {
            return Err(ChainError::InsufficientStake);
        }
        let validator_info = state_before
            .validators
            .get(&block.header.proposer)
            .ok_or(ChainError::InsufficientStake)?;
        if !validator_info.is_eligible(self.config.min_validator_stake) {
            return Err(ChainError::InsufficientStake);
        }
        // 4. signature.
        let digest = block.compute_hash(self.crypto.as_ref())?;
        let proposer_pk = block.header.proposer.as_bytes();
        let verified = self
            .crypto
            .verify_signature(proposer_pk, digest.as_bytes(), &block.header.signature)
            .unwrap_or(false);
        if !verified {
            return Err(ChainError::InvalidSignature);
        }
        // 5. timestamp drift.
        if block.header.timestamp <= prev.header.timestamp
            || block.header.timestamp > now + self.config.max_timestamp_drift_secs
        {
            return Err(ChainError::InvalidTimestamp);
        }
        // 6. timeliness: either enough time has passed since the last
        // block, or the batch is full enough to justify mining early.
        let elapsed = block.header.timestamp - prev.header.timestamp;
        if elapsed <= self.config.auto_mine_interval_secs && (block.body.len() as u64) < self.config.max_tx_per_block {
            return Err(ChainError::ConsensusViolation);
        }
        // 7. recomputed tx_root and state_root.
        let tx_ids: Vec<Hash> = block.body.iter().map(|t| t.id).collect();
        if block.header.tx_root != merkle_root(&tx_ids) {
            return Err(ChainError::MerkleMismatch);
        }

        let mut scratch = state_before.clone();
        for tx in &block.body {
            scratch.apply_transaction(tx, self.crypto.as_ref(), registry, min_fee)?;
        }
        let recomputed_state_root = scratch.state_root(self.crypto.as_ref())?;
        if block.header.state_root != recomputed_state_root {
            return Err(ChainError::StateRootMismatch);
        }

        Ok(())
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn block_reward(&self) -> Amount {
        self.config.block_reward
    }

    pub fn min_stake(&self) -> Amount {
        self.config.min_stake
    }

    pub fn validator(&self) -> Address {
        self.config.validator
    }

    pub fn genesis_address(&self) -> Address {
        self.config.genesis_address
    }
}

/// Current block height the caller should request next.
pub fn next_height(prev: &Block) -> Height {
    prev.header.height + 1
}
