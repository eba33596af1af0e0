/// Domain error taxonomy for the workflow engine
///
/// Every failure class the engine distinguishes gets its own type here:
/// structural graph errors, grant/permission denials, provider failures
/// (including the composite primary+fallback case), placeholder resolution
/// errors, and trigger evaluation errors. API handlers map these onto HTTP
/// status codes; the scheduler maps them onto workflow retry policy.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by provider adapters and the failover manager
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider API answered with an error response
    #[error("{provider} api error ({code:?}): {message}")]
    Api {
        provider: &'static str,
        code: Option<u16>,
        message: String,
    },

    /// The provider could not be reached at all
    #[error("{provider} network error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    /// Capability gap: the adapter genuinely does not support this operation.
    /// Never counted by the circuit breaker and never retried on the fallback.
    #[error("operation '{operation}' is not supported by {provider}")]
    NotSupported {
        provider: &'static str,
        operation: &'static str,
    },

    /// The quote expired between fetch and execute. The engine re-fetches a
    /// fresh quote once before giving up on the node.
    #[error("{provider}: quote '{quote_id}' expired before execution")]
    QuoteExpired {
        provider: &'static str,
        quote_id: String,
    },

    /// The circuit breaker is open and the primary was not consulted
    #[error("circuit open: primary skipped for '{operation}'")]
    CircuitOpen { operation: &'static str },

    /// Both the primary and the fallback failed for the same call
    #[error("both providers failed for '{operation}': primary: {primary}; fallback: {fallback}")]
    TotalFailure {
        operation: &'static str,
        primary: Box<ProviderError>,
        fallback: Box<ProviderError>,
    },
}

/// Errors raised by the vault capability while decrypting session keys
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault decryption failed: {0}")]
    Decrypt(String),

    #[error("invalid encryption context: {0}")]
    Context(String),
}

/// Persistence failures: the database itself, or a row that no longer
/// parses into its domain type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Errors raised by the grant resolver and the session signer
#[derive(Debug, Error)]
pub enum GrantError {
    /// No unexpired grant permits this target/value pair. Hard stop: the
    /// engine must never sign without a grant.
    #[error("no valid session key grant for target '{target}' with value {value}")]
    NoValidGrant { target: String, value: u128 },

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The decrypted key derives a different address than the grant claims
    #[error("decrypted key address '{derived}' does not match stored address '{stored}'")]
    AddressMismatch { derived: String, stored: String },

    #[error("invalid session key material: {0}")]
    KeyMaterial(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Placeholder resolution failure: the referenced path does not exist in
/// the accumulated execution data. Indicates a graph/config authoring bug.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not resolve placeholder '{placeholder}': path '{path}' not found in execution data")]
    PathNotFound { placeholder: String, path: String },
}

/// Errors raised while evaluating workflow triggers
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger misconfigured: {0}")]
    Misconfigured(String),

    #[error("trigger source error: {0}")]
    Source(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Graph validation failures, rejected at workflow creation time
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("workflow graph has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),

    /// Every node is the target of some edge, so no entry node exists
    #[error("workflow graph has no entry node (every node is an edge target)")]
    NoEntryNode,

    #[error("invalid trigger config: {0}")]
    Trigger(String),
}

/// Top-level engine error: everything a single graph traversal can die of
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected by the compare-and-set guard: another execution is in flight
    #[error("workflow {0} already has an execution in flight")]
    AlreadyRunning(Uuid),

    #[error("workflow {0} cannot be dispatched in its current state")]
    NotDispatchable(Uuid),

    #[error("workflow {0} not found")]
    NotFound(Uuid),

    /// Corrupt graph: missing node/edge reference, runtime cycle
    #[error("structural error: {0}")]
    Structural(String),

    #[error("invalid config for node '{node}': {message}")]
    NodeConfig { node: String, message: String },

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("permission denied: {0}")]
    Grant(#[from] GrantError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("notification delivery failed: {0}")]
    Notification(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Whether the owning workflow may be rescheduled for a retry.
    ///
    /// Structural, resolution and grant failures are authoring/permission
    /// bugs that will not heal on their own; provider, notification and
    /// storage failures are transient and eligible for the workflow-level
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Provider(_) | EngineError::Storage(_) | EngineError::Notification(_)
        )
    }
}
