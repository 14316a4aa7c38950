use crate::config::{DelFailurePolicy, HarnessConfig};
use crate::error::HarnessError;
use crate::executor::{InvocationOutput, PluginInvoker};
use crate::input::{InvocationArguments, Phase};
use crate::mutator::MutationSource;
use crate::namespace::NamespaceHandle;
use crate::oracle::{InvocationResult, OutcomeClassifier};
use crate::transcript::TranscriptSink;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Fixed inputs of a fuzz session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub iterations: u64,
    pub container_id: String,
    pub ifname: String,
    pub search_path: PathBuf,
    pub netns: PathBuf,
    pub del_failure: DelFailurePolicy,
}

impl SessionSettings {
    pub fn from_config(config: &HarnessConfig, netns: &NamespaceHandle) -> Self {
        Self {
            iterations: config.fuzzer.iterations,
            container_id: config.plugin.container_id.clone(),
            ifname: config.plugin.ifname.clone(),
            search_path: config.plugin.effective_search_path(),
            netns: netns.path().to_path_buf(),
            del_failure: config.fuzzer.del_failure,
        }
    }
}

/// Every classified invocation of a session, split by outcome, in issue order.
#[derive(Debug, Clone, Default)]
pub struct SessionTally {
    successes: Vec<InvocationResult>,
    failures: Vec<InvocationResult>,
}

impl SessionTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: InvocationResult) {
        if result.successful {
            self.successes.push(result);
        } else {
            self.failures.push(result);
        }
    }

    pub fn successes(&self) -> &[InvocationResult] {
        &self.successes
    }

    pub fn failures(&self) -> &[InvocationResult] {
        &self.failures
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// What one iteration issued: always an ADD, and a DEL only when ADD succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub add: InvocationResult,
    pub del: Option<InvocationResult>,
}

/// Outcome of writing one invocation to the transcript.
type Recorded = Result<(), HarnessError>;

enum IterationState {
    Start,
    AddPending(InvocationArguments),
    AddSucceeded(InvocationArguments, InvocationResult, Recorded),
    AddFailed(InvocationResult),
    DelPending(InvocationArguments, InvocationResult, Recorded),
    Done(IterationOutcome),
}

/// Drives the fuzz loop: mutate, ADD, and DEL whatever a successful ADD created.
///
/// Iterations run strictly one after another. They share one network
/// namespace, so a DEL has to finish before the next ADD starts.
pub struct SessionOrchestrator<M, P> {
    mutator: M,
    invoker: P,
    classifier: OutcomeClassifier,
    settings: SessionSettings,
}

impl<M: MutationSource, P: PluginInvoker> SessionOrchestrator<M, P> {
    pub fn new(
        mutator: M,
        invoker: P,
        classifier: OutcomeClassifier,
        settings: SessionSettings,
    ) -> Self {
        Self {
            mutator,
            invoker,
            classifier,
            settings,
        }
    }

    pub fn invoker(&self) -> &P {
        &self.invoker
    }

    /// Runs the configured number of iterations against `seed`.
    ///
    /// Plugin failures are recorded in `tally`; only harness-fatal conditions
    /// end the loop early.
    pub fn run(
        &mut self,
        seed: &[u8],
        tally: &mut SessionTally,
        transcript: &mut dyn TranscriptSink,
    ) -> Result<(), HarnessError> {
        let iterations = self.settings.iterations;
        info!(
            iterations,
            netns = %self.settings.netns.display(),
            "starting fuzz session"
        );

        let progress_step = (iterations / 100).max(1);
        for i in 1..=iterations {
            self.run_iteration(seed, tally, transcript)?;
            if i % progress_step == 0 {
                info!(
                    iteration = i,
                    iterations,
                    succeeded = tally.successes().len(),
                    failed = tally.failures().len(),
                    "fuzz progress"
                );
            }
        }

        info!(
            succeeded = tally.successes().len(),
            failed = tally.failures().len(),
            "fuzz session finished"
        );
        Ok(())
    }

    pub fn run_iteration(
        &mut self,
        seed: &[u8],
        tally: &mut SessionTally,
        transcript: &mut dyn TranscriptSink,
    ) -> Result<IterationOutcome, HarnessError> {
        let mut state = IterationState::Start;
        loop {
            state = match state {
                IterationState::Start => {
                    let payload = self.mutator.mutate(seed)?;
                    IterationState::AddPending(self.arguments(payload))
                }
                IterationState::AddPending(args) => {
                    let (invocation, add, recorded) =
                        self.invoke_and_record(Phase::Add, &args, tally, transcript);
                    if add.successful {
                        // A transcript error surfaces only after DEL has run.
                        IterationState::AddSucceeded(args, add, recorded)
                    } else {
                        recorded?;
                        if let Some(error) = invocation.error.filter(|e| e.is_harness_failure()) {
                            warn!(%error, "ADD could not be run; recorded as failure");
                        }
                        IterationState::AddFailed(add)
                    }
                }
                IterationState::AddSucceeded(args, add, recorded) => {
                    IterationState::DelPending(args, add, recorded)
                }
                IterationState::AddFailed(add) => {
                    IterationState::Done(IterationOutcome { add, del: None })
                }
                IterationState::DelPending(args, add, add_recorded) => {
                    let (invocation, del, del_recorded) =
                        self.invoke_and_record(Phase::Del, &args, tally, transcript);
                    if let Some(error) = invocation.error {
                        if error.is_harness_failure()
                            || self.settings.del_failure == DelFailurePolicy::Abort
                        {
                            if let Err(write_error) = add_recorded.and(del_recorded) {
                                warn!(
                                    error = %write_error,
                                    "transcript write failed before DEL abort"
                                );
                            }
                            return Err(HarnessError::Cleanup(error));
                        }
                        warn!(%error, code = del.code, "DEL failed after successful ADD");
                    }
                    add_recorded?;
                    del_recorded?;
                    IterationState::Done(IterationOutcome {
                        add,
                        del: Some(del),
                    })
                }
                IterationState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    fn arguments(&self, payload: Vec<u8>) -> InvocationArguments {
        InvocationArguments {
            container_id: self.settings.container_id.clone(),
            netns: self.settings.netns.clone(),
            ifname: self.settings.ifname.clone(),
            search_path: self.settings.search_path.clone(),
            stdin_data: payload,
        }
    }

    fn invoke_and_record(
        &mut self,
        phase: Phase,
        args: &InvocationArguments,
        tally: &mut SessionTally,
        transcript: &mut dyn TranscriptSink,
    ) -> (InvocationOutput, InvocationResult, Recorded) {
        let invocation = self.invoker.invoke(phase, args);
        let result = self.classifier.classify(phase, &invocation);
        debug!(
            phase = %phase,
            successful = result.successful,
            code = result.code,
            "classified invocation"
        );
        if result.crash_marker {
            warn!(
                phase = %phase,
                digest = %args.payload_digest(),
                "crash marker in plugin output"
            );
        }
        tally.record(result);
        let recorded = transcript.record(args, &invocation, &result);
        (invocation, result, recorded)
    }
}
