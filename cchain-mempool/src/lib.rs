use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cchain_contracts::ContractRegistry;
use cchain_core::{Amount, ChainError, CryptoProvider, Hash, Timestamp, Transaction, WorldState};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Capacity shared by both queues (§4.4: "Capacity = MemPoolLimit" for
    /// the standard queue AND the contract queue).
    pub mem_pool_limit: usize,
    /// Flush batch size cap for the standard queue (§4.4: "Flush batch size
    /// ≤ MaxTxPerBlock").
    pub max_tx_per_block: u64,
    pub max_contract_gas_per_block: u64,
    pub tx_timeout_secs: i64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            mem_pool_limit: 5_000,
            max_tx_per_block: 100,
            max_contract_gas_per_block: 5_000,
            tx_timeout_secs: 600,
        }
    }
}

struct Entry {
    tx: Transaction,
    received_at: Timestamp,
    seq: u64,
}

/// Plain transfers (no payload) ordered by fee descending, insertion order
/// as the tiebreak; bounded by `mem_pool_limit` entries.
struct StandardQueue {
    entries: Vec<Entry>,
}

impl StandardQueue {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn ordered_snapshot(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.entries.len()).collect();
        idx.sort_by(|&a, &b| {
            let ea = &self.entries[a];
            let eb = &self.entries[b];
            eb.tx.fee.cmp(&ea.tx.fee).then(ea.seq.cmp(&eb.seq))
        });
        idx
    }
}

/// Protocol-contract invocations, kept in arrival order; drained up to a
/// total-gas cap rather than a raw count since contracts carry differing
/// `gas_cost`.
struct ContractQueue {
    entries: Vec<Entry>,
}

impl ContractQueue {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }
}

pub struct Mempool {
    standard: Mutex<StandardQueue>,
    contract: Mutex<ContractQueue>,
    seen: Mutex<HashSet<Hash>>,
    seq_counter: AtomicU64,
    config: MempoolConfig,
    crypto: Arc<dyn CryptoProvider>,
}

impl Mempool {
    pub fn new(config: MempoolConfig, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            standard: Mutex::new(StandardQueue::new()),
            contract: Mutex::new(ContractQueue::new()),
            seen: Mutex::new(HashSet::new()),
            seq_counter: AtomicU64::new(0),
            config,
            crypto,
        }
    }

    /// Read-only precondition check against the current `WorldState`,
    /// mirroring `WorldState::apply_transaction`'s order without mutating
    /// anything: a transaction admitted here is not guaranteed to apply at
    /// block-production time (state may move between admission and
    /// inclusion), but an inadmissible one is rejected early.
    fn validate_for_admission(&self, tx: &Transaction, state: &WorldState, min_fee: Amount) -> Result<(), ChainError> {
        tx.verify_signature(self.crypto.as_ref())?;
        let sender = state.get_account(&tx.from).ok_or(ChainError::UnknownSender)?;
        if tx.nonce != sender.nonce + 1 {
            return Err(ChainError::BadNonce);
        }
        let total = tx.amount.checked_add(tx.fee).ok_or(ChainError::InsufficientBalance)?;
        if sender.balance < total {
            return Err(ChainError::InsufficientBalance);
        }
        if tx.fee < min_fee {
            return Err(ChainError::FeeTooLow);
        }
        tx.decode_payload()?;
        Ok(())
    }

    pub fn submit(&self, tx: Transaction, state: &WorldState, min_fee: Amount, now: Timestamp) -> Result<(), ChainError> {
        self.validate_for_admission(&tx, state, min_fee).map_err(|e| ChainError::TxInvalid(Box::new(e)))?;

        let mut seen = self.seen.lock();
        if seen.contains(&tx.id) {
            return Err(ChainError::TxInvalid(Box::new(ChainError::BadPayload(
                "duplicate transaction id".to_string(),
            ))));
        }

        let is_contract = tx.payload.is_some();
        if !is_contract {
            let mut standard = self.standard.lock();
            if standard.entries.len() >= self.config.mem_pool_limit {
                return Err(ChainError::MempoolFull);
            }
            let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
            standard.entries.push(Entry { tx: tx.clone(), received_at: now, seq });
        } else {
            let mut contract = self.contract.lock();
            if contract.entries.len() >= self.config.mem_pool_limit {
                return Err(ChainError::MempoolFull);
            }
            let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
            contract.entries.push(Entry { tx: tx.clone(), received_at: now, seq });
        }
        seen.insert(tx.id);
        Ok(())
    }

    /// Evict anything older than `tx_timeout_secs`, independent of draining.
    pub fn expire(&self, now: Timestamp) {
        let cutoff = now - self.config.tx_timeout_secs;
        let mut standard = self.standard.lock();
        let mut contract = self.contract.lock();
        let mut seen = self.seen.lock();
        standard.entries.retain(|e| {
            let keep = e.received_at >= cutoff;
            if !keep {
                seen.remove(&e.tx.id);
            }
            keep
        });
        contract.entries.retain(|e| {
            let keep = e.received_at >= cutoff;
            if !keep {
                seen.remove(&e.tx.id);
            }
            keep
        });
    }

    /// Drain transactions for the next block: up to `max_tx_per_block`
    /// eligible standard transactions ordered fee-desc/insertion-asc,
    /// followed by contract invocations in arrival order up to
    /// `max_contract_gas_per_block`. Anything left over stays queued.
    pub fn drain_for_block(&self, registry: &ContractRegistry) -> Vec<Transaction> {
        let mut out = Vec::new();

        let mut standard = self.standard.lock();
        let order = standard.ordered_snapshot();
        let take = order.len().min(self.config.max_tx_per_block as usize);
        let taken: HashSet<usize> = order[..take].iter().copied().collect();
        let mut drained_ids = Vec::with_capacity(take);
        for &idx in &order[..take] {
            let tx = standard.entries[idx].tx.clone();
            drained_ids.push(tx.id);
            out.push(tx);
        }
        let remaining: Vec<Entry> = standard
            .entries
            .drain(..)
            .enumerate()
            .filter_map(|(i, e)| if taken.contains(&i) { None } else { Some(e) })
            .collect();
        standard.entries = remaining;
        drop(standard);

        let mut contract = self.contract.lock();
        let mut gas_used = 0u64;
        let mut remaining = Vec::new();
        let mut contract_drained_ids = Vec::new();
        for entry in contract.entries.drain(..) {
            let gas = entry
                .tx
                .decode_payload()
                .ok()
                .flatten()
                .and_then(|inv| registry.get(&inv.contract).map(|c| c.gas_cost()))
                .unwrap_or(0);
            if gas_used + gas <= self.config.max_contract_gas_per_block {
                gas_used += gas;
                contract_drained_ids.push(entry.tx.id);
                out.push(entry.tx);
            } else {
                remaining.push(entry);
            }
        }
        contract.entries = remaining;
        drop(contract);

        let mut seen = self.seen.lock();
        for id in drained_ids.iter().chain(contract_drained_ids.iter()) {
            seen.remove(id);
        }

        out
    }

    pub fn standard_len(&self) -> usize {
        self.standard.lock().entries.len()
    }

    pub fn contract_len(&self) -> usize {
        self.contract.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cchain_core::Account;
    use cchain_crypto::{generate_ed25519, DefaultCryptoProvider};

    fn addr(byte: u8) -> cchain_core::Address {
        cchain_core::Address([byte; 32])
    }

    fn signed_tx(crypto: &DefaultCryptoProvider, pk: &[u8], sk: &[u8], nonce: u64, fee: u64) -> Transaction {
        let mut unsigned = Transaction {
            id: Hash::ZERO,
            from: crypto.address_from_public_key(pk).unwrap(),
            to: addr(255),
            amount: 1,
            fee,
            nonce,
            payload: None,
            signature: Vec::new(),
        };
        unsigned.id = unsigned.compute_id(crypto).unwrap();
        unsigned.signature = crypto.sign_message(sk, unsigned.id.as_bytes()).unwrap();
        unsigned
    }

    fn state_with(addr: cchain_core::Address, balance: Amount) -> WorldState {
        let mut state = WorldState::default();
        state.accounts.insert(addr, Account { balance, nonce: 0 });
        state
    }

    fn mempool() -> Mempool {
        Mempool::new(MempoolConfig::default(), Arc::new(DefaultCryptoProvider::new()))
    }

    #[test]
    fn orders_by_fee_then_insertion() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let mempool = mempool();
        let state = state_with(crypto.address_from_public_key(&kp.public_key).unwrap(), 1000);
        let tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, 5);
        mempool.submit(tx, &state, 1, 0).unwrap();
        let registry = ContractRegistry::with_builtins();
        let drained = mempool.drain_for_block(&registry);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].fee, 5);
    }

    #[test]
    fn drain_for_block_caps_batch_size() {
        let crypto = DefaultCryptoProvider::new();
        let mempool = Mempool::new(
            MempoolConfig {
                max_tx_per_block: 2,
                ..MempoolConfig::default()
            },
            Arc::new(DefaultCryptoProvider::new()),
        );
        let mut state = WorldState::default();
        let mut txs = Vec::new();
        for fee in [1u64, 2, 3] {
            let kp = generate_ed25519();
            let addr = crypto.address_from_public_key(&kp.public_key).unwrap();
            state.accounts.insert(addr, Account { balance: 1000, nonce: 0 });
            txs.push(signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, fee));
        }
        for tx in txs {
            mempool.submit(tx, &state, 1, 0).unwrap();
        }
        let registry = ContractRegistry::with_builtins();
        let drained = mempool.drain_for_block(&registry);
        assert_eq!(drained.len(), 2);
        assert_eq!(mempool.standard_len(), 1);
    }

    #[test]
    fn contract_queue_rejects_when_full() {
        let crypto = DefaultCryptoProvider::new();
        let mempool = Mempool::new(
            MempoolConfig {
                mem_pool_limit: 1,
                ..MempoolConfig::default()
            },
            Arc::new(DefaultCryptoProvider::new()),
        );
        let mut state = WorldState::default();
        let invocation = cchain_core::ContractInvocation {
            contract: "CreateCoop".to_string(),
            params: std::collections::HashMap::new(),
        };
        let payload = serde_json::to_vec(&invocation).unwrap();

        let kp1 = generate_ed25519();
        let addr1 = crypto.address_from_public_key(&kp1.public_key).unwrap();
        state.accounts.insert(addr1, Account { balance: 1000, nonce: 0 });
        let mut tx1 = signed_tx(&crypto, &kp1.public_key, &kp1.secret_key, 1, 1);
        tx1.payload = Some(payload.clone());
        tx1.id = tx1.compute_id(&crypto).unwrap();
        tx1.signature = crypto.sign_message(&kp1.secret_key, tx1.id.as_bytes()).unwrap();
        mempool.submit(tx1, &state, 1, 0).unwrap();

        let kp2 = generate_ed25519();
        let addr2 = crypto.address_from_public_key(&kp2.public_key).unwrap();
        state.accounts.insert(addr2, Account { balance: 1000, nonce: 0 });
        let mut tx2 = signed_tx(&crypto, &kp2.public_key, &kp2.secret_key, 1, 1);
        tx2.payload = Some(payload);
        tx2.id = tx2.compute_id(&crypto).unwrap();
        tx2.signature = crypto.sign_message(&kp2.secret_key, tx2.id.as_bytes()).unwrap();
        let err = mempool.submit(tx2, &state, 1, 0).unwrap_err();
        assert!(matches!(err, ChainError::MempoolFull));
    }

    /// Ta(fee=5), Tb(fee=10), Tc(fee=5) submitted in that order must drain
    /// as [Tb, Ta, Tc]: fee-descending, insertion order breaking ties.
    #[test]
    fn fee_priority_orders_ties_by_insertion() {
        let crypto = DefaultCryptoProvider::new();
        let mempool = mempool();
        let mut state = WorldState::default();
        let mut kps = Vec::new();
        for _ in 0..3 {
            let kp = generate_ed25519();
            let addr = crypto.address_from_public_key(&kp.public_key).unwrap();
            state.accounts.insert(addr, Account { balance: 1000, nonce: 0 });
            kps.push(kp);
        }
        let ta = signed_tx(&crypto, &kps[0].public_key, &kps[0].secret_key, 1, 5);
        let tb = signed_tx(&crypto, &kps[1].public_key, &kps[1].secret_key, 1, 10);
        let tc = signed_tx(&crypto, &kps[2].public_key, &kps[2].secret_key, 1, 5);
        let (ta_id, tb_id, tc_id) = (ta.id, tb.id, tc.id);
        mempool.submit(ta, &state, 1, 0).unwrap();
        mempool.submit(tb, &state, 1, 0).unwrap();
        mempool.submit(tc, &state, 1, 0).unwrap();

        let registry = ContractRegistry::with_builtins();
        let drained = mempool.drain_for_block(&registry);
        let order: Vec<Hash> = drained.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![tb_id, ta_id, tc_id]);
    }

    /// S2: T2{from=V, to=A, amount=10, fee=1, nonce=99} against an account
    /// at nonce=0 is rejected with BadNonce, and admission leaves no trace.
    #[test]
    fn scenario_s2_rejects_bad_nonce() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let mempool = mempool();
        let state = state_with(crypto.address_from_public_key(&kp.public_key).unwrap(), 1000);
        let tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 99, 1);
        let err = mempool.submit(tx, &state, 1, 0).unwrap_err();
        match err {
            ChainError::TxInvalid(inner) => assert!(matches!(*inner, ChainError::BadNonce)),
            other => panic!("expected TxInvalid(BadNonce), got {other:?}"),
        }
        assert_eq!(mempool.standard_len(), 0);
    }

    #[test]
    fn rejects_unknown_sender() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let mempool = mempool();
        let state = WorldState::default();
        let tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, 5);
        let err = mempool.submit(tx, &state, 1, 0).unwrap_err();
        assert!(matches!(err, ChainError::TxInvalid(_)));
    }

    #[test]
    fn rejects_bad_signature() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let other = generate_ed25519();
        let mempool = mempool();
        let state = state_with(crypto.address_from_public_key(&kp.public_key).unwrap(), 1000);
        let mut tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, 5);
        tx.signature = crypto.sign_message(&other.secret_key, tx.id.as_bytes()).unwrap();
        let err = mempool.submit(tx, &state, 1, 0).unwrap_err();
        assert!(matches!(err, ChainError::TxInvalid(_)));
    }

    #[test]
    fn rejects_duplicate_id() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let mempool = mempool();
        let state = state_with(crypto.address_from_public_key(&kp.public_key).unwrap(), 1000);
        let tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, 5);
        mempool.submit(tx.clone(), &state, 1, 0).unwrap();
        let err = mempool.submit(tx, &state, 1, 0).unwrap_err();
        assert!(matches!(err, ChainError::TxInvalid(_)));
    }

    #[test]
    fn expire_evicts_stale_entries() {
        let crypto = DefaultCryptoProvider::new();
        let kp = generate_ed25519();
        let mempool = Mempool::new(
            MempoolConfig {
                tx_timeout_secs: 10,
                ..MempoolConfig::default()
            },
            Arc::new(DefaultCryptoProvider::new()),
        );
        let state = state_with(crypto.address_from_public_key(&kp.public_key).unwrap(), 1000);
        let tx = signed_tx(&crypto, &kp.public_key, &kp.secret_key, 1, 5);
        mempool.submit(tx, &state, 1, 0).unwrap();
        mempool.expire(100);
        assert_eq!(mempool.standard_len(), 0);
    }
}
