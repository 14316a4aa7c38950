use crate::error::HarnessError;
use crate::executor::InvocationOutput;
use crate::input::InvocationArguments;
use crate::oracle::InvocationResult;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Which invocations make it into the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptVerbosity {
    #[default]
    All,
    /// Only invocations whose output or error carried a crash marker.
    CrashesOnly,
}

impl TranscriptVerbosity {
    pub fn from_panic_only(panic_only: bool) -> Self {
        if panic_only {
            TranscriptVerbosity::CrashesOnly
        } else {
            TranscriptVerbosity::All
        }
    }

    pub fn admits(&self, result: &InvocationResult) -> bool {
        match self {
            TranscriptVerbosity::All => true,
            TranscriptVerbosity::CrashesOnly => result.crash_marker,
        }
    }
}

/// Receives every classified invocation, in the order they were issued.
pub trait TranscriptSink {
    fn record(
        &mut self,
        args: &InvocationArguments,
        invocation: &InvocationOutput,
        result: &InvocationResult,
    ) -> Result<(), HarnessError>;
}

/// Plain-text transcript: one block per admitted invocation.
pub struct Transcript<W: Write> {
    writer: W,
    verbosity: TranscriptVerbosity,
    entries_written: usize,
}

impl Transcript<BufWriter<File>> {
    pub fn create(path: &Path, verbosity: TranscriptVerbosity) -> Result<Self, HarnessError> {
        let file = File::create(path).map_err(|source| HarnessError::TranscriptOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file), verbosity))
    }
}

impl<W: Write> Transcript<W> {
    pub fn new(writer: W, verbosity: TranscriptVerbosity) -> Self {
        Self {
            writer,
            verbosity,
            entries_written: 0,
        }
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    pub fn flush(&mut self) -> Result<(), HarnessError> {
        self.writer.flush().map_err(HarnessError::TranscriptWrite)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_entry(
        &mut self,
        args: &InvocationArguments,
        invocation: &InvocationOutput,
        result: &InvocationResult,
    ) -> std::io::Result<()> {
        let outcome = if result.successful { "SUCCESS" } else { "FAIL" };
        writeln!(self.writer, "Command: {} - {}", result.phase, outcome)?;
        if let Some(error) = &invocation.error {
            writeln!(self.writer, "Error: {error}")?;
        }
        writeln!(self.writer, "Input digest: {}", args.payload_digest())?;
        writeln!(
            self.writer,
            "Input data: {}",
            String::from_utf8_lossy(&args.stdin_data)
        )?;
        writeln!(
            self.writer,
            "Output: {}\n",
            String::from_utf8_lossy(&invocation.output)
        )
    }
}

impl<W: Write> TranscriptSink for Transcript<W> {
    fn record(
        &mut self,
        args: &InvocationArguments,
        invocation: &InvocationOutput,
        result: &InvocationResult,
    ) -> Result<(), HarnessError> {
        if !self.verbosity.admits(result) {
            return Ok(());
        }
        self.write_entry(args, invocation, result)
            .map_err(HarnessError::TranscriptWrite)?;
        self.entries_written += 1;
        Ok(())
    }
}
