//! Pipeline stages for repository assessment.
//!
//! Every stage that touches the outside world goes through the
//! [`executor::Executor`] seam or an HTTP backend trait so that the
//! orchestration can be exercised without network or toolchains.

pub mod checkout;
pub mod checks;
pub mod executor;
#[cfg(test)]
mod http_stub;
pub mod metrics;
pub mod narrative;
pub mod parsers;
pub mod publish;
pub mod testrun;

pub use checkout::WorkingCopy;
pub use executor::{CommandOutput, CommandSpec, Executor, LocalExecutor};
pub use metrics::MetricsAnalyzer;
pub use narrative::{NarrativeBackend, NarrativeInterpreter, OpenAiBackend, SynapseAgentBackend};
pub use publish::{ArtifactStore, PublishReceipt, SynapseStore};
pub use testrun::TestRunner;
