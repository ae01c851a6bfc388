use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    #[error("bad payload: {0}")]
    BadPayload(String),
    #[error("contract execution failed: {0}")]
    Execution(String),
}

/// The mutation surface a built-in contract is allowed to touch. Implemented
/// by the world state on the core side; kept here so this crate has no
/// dependency on `cchain-core` (the dispatcher is called from core, not the
/// other way around).
pub trait ChainContext {
    fn create_coop(&mut self, creator: &str, name: &str, description: &str) -> Result<(), ContractError>;
    fn record_vote(
        &mut self,
        voter: &str,
        coop_id: &str,
        proposal_id: &str,
        choice: bool,
    ) -> Result<(), ContractError>;
    fn issue_token(&mut self, issuer: &str, amount: u64, symbol: &str) -> Result<(), ContractError>;
}

pub trait Contract: Send + Sync {
    fn id(&self) -> &'static str;
    fn gas_cost(&self) -> u64;
    fn fields(&self) -> &'static [&'static str];
    fn events(&self) -> &'static [&'static str];
    fn call(&self, ctx: &mut dyn ChainContext, params: &HashMap<String, Value>) -> Result<String, ContractError>;
}

fn field_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, ContractError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ContractError::BadPayload(format!("missing or non-string field '{key}'")))
}

fn field_u64(params: &HashMap<String, Value>, key: &str) -> Result<u64, ContractError> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ContractError::BadPayload(format!("missing or non-integer field '{key}'")))
}

fn field_bool(params: &HashMap<String, Value>, key: &str) -> Result<bool, ContractError> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ContractError::BadPayload(format!("missing or non-boolean field '{key}'")))
}

pub struct CreateCoopContract;

impl Contract for CreateCoopContract {
    fn id(&self) -> &'static str {
        "CreateCoop"
    }

    fn gas_cost(&self) -> u64 {
        50
    }

    fn fields(&self) -> &'static [&'static str] {
        &["creator", "name", "description"]
    }

    fn events(&self) -> &'static [&'static str] {
        &["CoopCreated"]
    }

    fn call(&self, ctx: &mut dyn ChainContext, params: &HashMap<String, Value>) -> Result<String, ContractError> {
        let creator = field_str(params, "creator")?;
        let name = field_str(params, "name")?;
        let description = params.get("description").and_then(|v| v.as_str()).unwrap_or("");
        ctx.create_coop(creator, name, description)?;
        Ok("CoopCreated".to_string())
    }
}

pub struct VoteContract;

impl Contract for VoteContract {
    fn id(&self) -> &'static str {
        "Vote"
    }

    fn gas_cost(&self) -> u64 {
        20
    }

    fn fields(&self) -> &'static [&'static str] {
        &["voter", "coop_id", "proposal_id", "choice"]
    }

    fn events(&self) -> &'static [&'static str] {
        &["VoteRecorded"]
    }

    fn call(&self, ctx: &mut dyn ChainContext, params: &HashMap<String, Value>) -> Result<String, ContractError> {
        let voter = field_str(params, "voter")?;
        let coop_id = field_str(params, "coop_id")?;
        let proposal_id = field_str(params, "proposal_id")?;
        let choice = field_bool(params, "choice")?;
        ctx.record_vote(voter, coop_id, proposal_id, choice)?;
        Ok("VoteRecorded".to_string())
    }
}

pub struct IssueTokenContract;

impl Contract for IssueTokenContract {
    fn id(&self) -> &'static str {
        "IssueToken"
    }

    fn gas_cost(&self) -> u64 {
        80
    }

    fn fields(&self) -> &'static [&'static str] {
        &["issuer", "amount", "symbol"]
    }

    fn events(&self) -> &'static [&'static str] {
        &["TokenIssued"]
    }

    fn call(&self, ctx: &mut dyn ChainContext, params: &HashMap<String, Value>) -> Result<String, ContractError> {
        let issuer = field_str(params, "issuer")?;
        let amount = field_u64(params, "amount")?;
        let symbol = field_str(params, "symbol")?;
        ctx.issue_token(issuer, amount, symbol)?;
        Ok("TokenIssued".to_string())
    }
}

/// Immutable name -> handler table, built once at construction. Runtime
/// registration is not part of the contract (unlike the teacher's
/// `tokio::sync::RwLock`-guarded registry, which supports `register` after
/// startup).
pub struct ContractRegistry {
    contracts: HashMap<String, Box<dyn Contract>>,
}

impl ContractRegistry {
    pub fn with_builtins() -> Self {
        let mut contracts: HashMap<String, Box<dyn Contract>> = HashMap::new();
        for handler in built_in_handlers() {
            contracts.insert(handler.id().to_string(), handler);
        }
        Self { contracts }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Contract> {
        self.contracts.get(name).map(|b| b.as_ref())
    }

    pub fn dispatch(
        &self,
        name: &str,
        ctx: &mut dyn ChainContext,
        params: &HashMap<String, Value>,
    ) -> Result<String, ContractError> {
        let handler = self
            .get(name)
            .ok_or_else(|| ContractError::UnknownContract(name.to_string()))?;
        for field in handler.fields() {
            if *field == "description" {
                continue;
            }
            if !params.contains_key(*field) {
                return Err(ContractError::BadPayload(format!("missing field '{field}'")));
            }
        }
        handler.call(ctx, params)
    }
}

fn built_in_handlers() -> Vec<Box<dyn Contract>> {
    vec![
        Box::new(CreateCoopContract),
        Box::new(VoteContract),
        Box::new(IssueTokenContract),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingContext {
        coops_created: Vec<(String, String)>,
        votes: Vec<(String, String, String, bool)>,
        issued: Vec<(String, u64, String)>,
    }

    impl ChainContext for RecordingContext {
        fn create_coop(&mut self, creator: &str, name: &str, _description: &str) -> Result<(), ContractError> {
            self.coops_created.push((creator.to_string(), name.to_string()));
            Ok(())
        }

        fn record_vote(
            &mut self,
            voter: &str,
            coop_id: &str,
            proposal_id: &str,
            choice: bool,
        ) -> Result<(), ContractError> {
            self.votes
                .push((voter.to_string(), coop_id.to_string(), proposal_id.to_string(), choice));
            Ok(())
        }

        fn issue_token(&mut self, issuer: &str, amount: u64, symbol: &str) -> Result<(), ContractError> {
            self.issued.push((issuer.to_string(), amount, symbol.to_string()));
            Ok(())
        }
    }

    #[test]
    fn create_coop_dispatch() {
        let registry = ContractRegistry::with_builtins();
        let mut ctx = RecordingContext::default();
        let params: HashMap<String, Value> = [
            ("creator".to_string(), Value::String("A".into())),
            ("name".to_string(), Value::String("c1".into())),
            ("description".to_string(), Value::String("".into())),
        ]
        .into_iter()
        .collect();
        let result = registry.dispatch("CreateCoop", &mut ctx, &params).unwrap();
        assert_eq!(result, "CoopCreated");
        assert_eq!(ctx.coops_created, vec![("A".to_string(), "c1".to_string())]);
    }

    #[test]
    fn unknown_contract_rejected() {
        let registry = ContractRegistry::with_builtins();
        let mut ctx = RecordingContext::default();
        let err = registry.dispatch("NoSuch", &mut ctx, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ContractError::UnknownContract(_)));
    }

    #[test]
    fn missing_field_rejected() {
        let registry = ContractRegistry::with_builtins();
        let mut ctx = RecordingContext::default();
        let params: HashMap<String, Value> =
            [("voter".to_string(), Value::String("A".into()))].into_iter().collect();
        let err = registry.dispatch("Vote", &mut ctx, &params).unwrap_err();
        assert!(matches!(err, ContractError::BadPayload(_)));
    }
}
