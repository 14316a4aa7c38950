pub mod config;
pub mod error;
pub mod executor;
pub mod input;
pub mod mutator;
pub mod namespace;
pub mod oracle;
pub mod report;
pub mod seed;
pub mod session;
pub mod transcript;

pub use config::{DelFailurePolicy, HarnessConfig, MutatorSettings};
pub use error::HarnessError;
pub use executor::{CommandInvoker, InvocationError, InvocationOutput, PluginInvoker};
pub use input::{InvocationArguments, Phase};
pub use mutator::{
    ByteFlipMutator, ExternalMutator, JsonFieldMutator, MutationError, MutationSource,
};
pub use namespace::{
    ExistingNamespace, NamespaceError, NamespaceHandle, NamespaceProvider, PinnedNamespaceProvider,
};
pub use oracle::{CrashSignalDetector, InvocationResult, MarkerDetector, OutcomeClassifier};
pub use report::{ErrorHistogram, SessionSummary, summarize};
pub use session::{IterationOutcome, SessionOrchestrator, SessionSettings, SessionTally};
pub use transcript::{Transcript, TranscriptSink, TranscriptVerbosity};
