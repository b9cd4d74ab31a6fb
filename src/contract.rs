//! The contract evaluation boundary (§1 Non-goals: "deterministic VM
//! semantics for contracts... delegated to an external evaluator").
//!
//! SmartXChain's CORE never interprets contract bytecode. These two traits
//! are the seam a real evaluator/analyzer process plugs into; the reference
//! implementations below exist so the node and its tests can run end to end
//! without one.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("contract evaluation failed: {0}")]
    EvaluationFailed(String),
    #[error("contract code rejected by policy: {0}")]
    PolicyRejected(String),
}

pub type ContractResult<T> = Result<T, ContractError>;

#[derive(Debug, Clone)]
pub struct ContractExecutionOutcome {
    pub new_state_base64: String,
    pub ok: bool,
    pub message: String,
}

/// Executes `(name, state_bytes, inputs) -> outcome` (§4.8
/// `ExecuteSmartContract`). The CORE calls this and, only on `ok == true`,
/// emits the resulting state-update transaction.
#[async_trait]
pub trait ContractEvaluator: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        state_base64: &str,
        inputs: &str,
    ) -> ContractResult<ContractExecutionOutcome>;
}

/// The static safety predicate used by `ReachCodeConsensus` (§4.5): each
/// peer runs this against proposed contract code and replies `"ok"` or a
/// failure string.
#[async_trait]
pub trait CodePolicy: Send + Sync {
    async fn is_safe(&self, code_base64: &str) -> ContractResult<()>;
}

/// A reference evaluator that round-trips the inputs back as the new state,
/// suitable for wiring the node end to end in tests before a real
/// contract-execution service exists.
pub struct EchoEvaluator;

#[async_trait]
impl ContractEvaluator for EchoEvaluator {
    async fn execute(
        &self,
        _name: &str,
        _state_base64: &str,
        inputs: &str,
    ) -> ContractResult<ContractExecutionOutcome> {
        Ok(ContractExecutionOutcome {
            new_state_base64: crate::crypto::compress_base64(inputs.as_bytes()),
            ok: true,
            message: "ok".to_string(),
        })
    }
}

/// A reference policy that accepts any code, standing in for the real
/// external source-code analyzer (§1, out of scope).
pub struct AllowAllPolicy;

#[async_trait]
impl CodePolicy for AllowAllPolicy {
    async fn is_safe(&self, _code_base64: &str) -> ContractResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_evaluator_always_succeeds() {
        let outcome = EchoEvaluator.execute("Counter", "", "increment").await.unwrap();
        assert!(outcome.ok);
    }

    #[tokio::test]
    async fn allow_all_policy_accepts_any_code() {
        assert!(AllowAllPolicy.is_safe("anything").await.is_ok());
    }
}
