use crate::input::{InvocationArguments, Phase};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;
use tracing::debug;

/// Why an invocation did not end with a zero exit status.
///
/// `Spawn` and `Io` mean the harness could not run the plugin at all. The exit
/// variants are the plugin's own verdict and are expected while fuzzing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("failed to spawn plugin {path:?}: {reason}")]
    Spawn { path: PathBuf, reason: String },
    #[error("plugin I/O failed: {0}")]
    Io(String),
    #[error("exit status {0}")]
    ExitCode(i32),
    #[error("terminated by signal {0}")]
    Signal(i32),
}

impl InvocationError {
    /// True when the plugin never produced a verdict of its own.
    pub fn is_harness_failure(&self) -> bool {
        matches!(self, InvocationError::Spawn { .. } | InvocationError::Io(_))
    }
}

/// Raw result of one plugin run: combined stdout/stderr and, on failure, why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
    pub output: Vec<u8>,
    pub error: Option<InvocationError>,
}

impl InvocationOutput {
    pub fn success(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(output: impl Into<Vec<u8>>, error: InvocationError) -> Self {
        Self {
            output: output.into(),
            error: Some(error),
        }
    }
}

/// Runs the plugin under test for a single lifecycle phase.
///
/// Implementations always hand back whatever output was produced. Deciding
/// what the output means is left to the classifier.
pub trait PluginInvoker {
    fn invoke(&mut self, phase: Phase, args: &InvocationArguments) -> InvocationOutput;
}

/// Spawns the plugin executable as a child process per call.
///
/// The child inherits the harness environment plus the protocol variables,
/// reads the payload on stdin, and writes stdout and stderr into one pipe so
/// the captured output keeps its original interleaving. There is no timeout:
/// a hung plugin blocks the caller.
pub struct CommandInvoker {
    plugin_path: PathBuf,
}

impl CommandInvoker {
    pub fn new(plugin_path: impl Into<PathBuf>) -> Self {
        Self {
            plugin_path: plugin_path.into(),
        }
    }

    fn spawn(
        &self,
        phase: Phase,
        args: &InvocationArguments,
    ) -> Result<(Child, File), InvocationError> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| InvocationError::Io(format!("failed to create output pipe: {e}")))?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| InvocationError::Io(format!("failed to duplicate output pipe: {e}")))?;

        let mut cmd = Command::new(&self.plugin_path);
        cmd.envs(args.env_vars(phase))
            .stdin(Stdio::piped())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer));

        let spawned = cmd.spawn();
        // The command still owns our copies of the write end; reading would
        // never see EOF while they are open.
        drop(cmd);

        let child = spawned.map_err(|e| InvocationError::Spawn {
            path: self.plugin_path.clone(),
            reason: e.to_string(),
        })?;
        Ok((child, File::from(reader)))
    }

    fn collect(
        mut child: Child,
        mut reader: File,
        payload: Vec<u8>,
        output: &mut Vec<u8>,
    ) -> Result<ExitStatus, InvocationError> {
        let stdin = child.stdin.take();
        // Feed stdin from a separate thread so a plugin that writes a lot
        // before reading its input cannot deadlock against us.
        let feeder = thread::spawn(move || -> io::Result<()> {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload) {
                // The plugin is free to exit without reading its config.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        });

        let read_result = reader.read_to_end(output);
        let feed_result = feeder
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stdin feeder thread panicked")));
        let status = child
            .wait()
            .map_err(|e| InvocationError::Io(format!("failed to wait for plugin: {e}")))?;

        read_result.map_err(|e| InvocationError::Io(format!("failed to read plugin output: {e}")))?;
        feed_result.map_err(|e| InvocationError::Io(format!("failed to write plugin stdin: {e}")))?;
        Ok(status)
    }
}

fn status_error(status: ExitStatus) -> Option<InvocationError> {
    if status.success() {
        return None;
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => Some(InvocationError::ExitCode(code)),
        (None, Some(signal)) => Some(InvocationError::Signal(signal)),
        (None, None) => Some(InvocationError::Io(format!("plugin exited abnormally: {status}"))),
    }
}

impl PluginInvoker for CommandInvoker {
    fn invoke(&mut self, phase: Phase, args: &InvocationArguments) -> InvocationOutput {
        let (child, reader) = match self.spawn(phase, args) {
            Ok(spawned) => spawned,
            Err(e) => return InvocationOutput::failure(Vec::new(), e),
        };

        let mut output = Vec::new();
        let error = match Self::collect(child, reader, args.stdin_data.clone(), &mut output) {
            Ok(status) => status_error(status),
            Err(e) => Some(e),
        };
        debug!(
            phase = %phase,
            output_len = output.len(),
            error = ?error,
            "plugin invocation finished"
        );
        InvocationOutput { output, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_target_path(name: &str) -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.join("../test_targets").join(name)
    }

    fn args_with_payload(payload: &[u8]) -> InvocationArguments {
        InvocationArguments {
            container_id: "dummy".to_string(),
            netns: PathBuf::from("/var/run/netns/cnifuzz-test"),
            ifname: "net1".to_string(),
            search_path: PathBuf::from("/opt/cni/bin"),
            stdin_data: payload.to_vec(),
        }
    }

    #[test]
    fn successful_plugin_returns_no_error() {
        let target_path = get_test_target_path("plugin_ok.sh");
        if !target_path.exists() {
            panic!("Test target missing: {target_path:?}");
        }
        let mut invoker = CommandInvoker::new(target_path);

        let result = invoker.invoke(Phase::Add, &args_with_payload(b"{}"));
        assert_eq!(result.error, None);
        assert!(result.output.is_empty());
    }

    #[test]
    fn plugin_sees_protocol_environment_and_stdin() {
        let target_path = get_test_target_path("plugin_echo_env.sh");
        let mut invoker = CommandInvoker::new(target_path);

        let result = invoker.invoke(Phase::Del, &args_with_payload(b"{\"name\":\"t\"}"));
        let text = String::from_utf8_lossy(&result.output);

        assert_eq!(result.error, None, "output was: {text}");
        assert!(text.contains("command=DEL"), "output was: {text}");
        assert!(text.contains("container=dummy"));
        assert!(text.contains("netns=/var/run/netns/cnifuzz-test"));
        assert!(text.contains("ifname=net1"));
        assert!(text.contains("path=/opt/cni/bin"));
        assert!(text.contains("stdin={\"name\":\"t\"}"));
    }

    #[test]
    fn non_zero_exit_keeps_output() {
        let target_path = get_test_target_path("plugin_code7.sh");
        let mut invoker = CommandInvoker::new(target_path);

        let result = invoker.invoke(Phase::Add, &args_with_payload(b"garbage"));
        assert_eq!(result.error, Some(InvocationError::ExitCode(1)));
        assert!(String::from_utf8_lossy(&result.output).contains("\"code\": 7"));
        assert!(!result.error.unwrap().is_harness_failure());
    }

    #[test]
    fn stderr_is_captured_alongside_stdout() {
        let target_path = get_test_target_path("plugin_panic.sh");
        let mut invoker = CommandInvoker::new(target_path);

        let result = invoker.invoke(Phase::Add, &args_with_payload(b"{"));
        let text = String::from_utf8_lossy(&result.output);
        assert_eq!(result.error, Some(InvocationError::ExitCode(2)));
        assert!(text.contains("stdout line"), "output was: {text}");
        assert!(text.contains("panic: runtime error"), "output was: {text}");
    }

    #[test]
    fn plugin_ignoring_stdin_is_not_an_io_failure() {
        let target_path = get_test_target_path("plugin_ok.sh");
        let mut invoker = CommandInvoker::new(target_path);
        let large_payload = vec![b'x'; 1 << 20];

        let result = invoker.invoke(Phase::Add, &args_with_payload(&large_payload));
        assert_eq!(result.error, None);
    }

    #[test]
    fn missing_plugin_is_a_harness_failure() {
        let mut invoker = CommandInvoker::new("./this_plugin_does_not_exist_ever_12345");

        let result = invoker.invoke(Phase::Add, &args_with_payload(b"{}"));
        match result.error {
            Some(ref e @ InvocationError::Spawn { .. }) => assert!(e.is_harness_failure()),
            other => panic!("Expected Spawn error, got {other:?}"),
        }
        assert!(result.output.is_empty());
    }
}
