//! Service handlers, one per kind.
//!
//! A handler is a pure function over `(decoded request, signer, external
//! I/O)`. Handlers never touch the request registry or the chain
//! submission layer; they classify their own failures and return an
//! outcome the dispatcher acts on. The kind → handler map is closed:
//! adding a kind is a code change here.

pub mod automation;
pub mod confidential;
pub mod json_path;
pub mod mixer;
pub mod oracle;
pub mod randomness;

pub use automation::AutomationHandler;
pub use confidential::ConfidentialHandler;
pub use mixer::MixerHandler;
pub use oracle::{Allowlist, OracleHandler};
pub use randomness::RandomnessHandler;

use async_trait::async_trait;
use nsl_core::{HandlerOutcome, RequestPayload, ServiceKind, ServiceRequest};

#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome;
}

/// The closed handler set.
pub struct HandlerSet {
    pub oracle: OracleHandler,
    pub randomness: RandomnessHandler,
    pub mixer: MixerHandler,
    pub confidential: ConfidentialHandler,
    pub automation: AutomationHandler,
}

impl HandlerSet {
    pub fn dispatch(&self, kind: ServiceKind) -> &dyn ServiceHandler {
        match kind {
            ServiceKind::Oracle => &self.oracle,
            ServiceKind::Randomness => &self.randomness,
            ServiceKind::Mixer => &self.mixer,
            ServiceKind::Confidential => &self.confidential,
            ServiceKind::Automation => &self.automation,
        }
    }
}
