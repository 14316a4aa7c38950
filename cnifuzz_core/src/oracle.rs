use crate::executor::InvocationOutput;
use crate::input::Phase;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Marker matched by [`MarkerDetector::default`].
pub const DEFAULT_CRASH_MARKER: &str = "panic";

static ERROR_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""code"\s*:\s*([0-9]+)"#).expect("error code pattern is valid"));

/// Decides whether a piece of text carries the signature of an uncontrolled failure.
///
/// The classifier only uses the answer to flag results for closer inspection;
/// it never flips a success into a failure or the other way round.
pub trait CrashSignalDetector: Send + Sync {
    fn detect(&self, text: &str) -> bool;
}

/// Case-insensitive substring match against a list of markers.
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    markers: Vec<String>,
}

impl MarkerDetector {
    pub fn new<S: AsRef<str>>(markers: impl IntoIterator<Item = S>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self::new([DEFAULT_CRASH_MARKER])
    }
}

impl CrashSignalDetector for MarkerDetector {
    fn detect(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.markers.iter().any(|m| haystack.contains(m.as_str()))
    }
}

/// Classified outcome of one plugin invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationResult {
    pub phase: Phase,
    pub successful: bool,
    /// Structured error code reported by the plugin, 0 when absent or on success.
    pub code: i64,
    /// A crash marker was found in the error text or output of a failed invocation.
    pub crash_marker: bool,
}

impl InvocationResult {
    /// A failure the plugin did not report through its structured error path,
    /// or one that left a crash marker behind.
    pub fn is_suspected_crash(&self) -> bool {
        !self.successful && (self.code == 0 || self.crash_marker)
    }
}

/// Scans plugin output for a `"code": <int>` marker. The first match wins.
pub fn extract_error_code(output: &[u8]) -> Option<i64> {
    let captures = ERROR_CODE_RE.captures(output)?;
    let digits = std::str::from_utf8(captures.get(1)?.as_bytes()).ok()?;
    digits.parse().ok()
}

/// Turns raw invocation output into an [`InvocationResult`].
pub struct OutcomeClassifier {
    detector: Box<dyn CrashSignalDetector>,
}

impl OutcomeClassifier {
    pub fn new(detector: Box<dyn CrashSignalDetector>) -> Self {
        Self { detector }
    }

    pub fn classify(&self, phase: Phase, invocation: &InvocationOutput) -> InvocationResult {
        let Some(error) = &invocation.error else {
            return InvocationResult {
                phase,
                successful: true,
                code: 0,
                crash_marker: false,
            };
        };

        let code = extract_error_code(&invocation.output).unwrap_or(0);
        let crash_marker = self.detector.detect(&error.to_string())
            || self
                .detector
                .detect(&String::from_utf8_lossy(&invocation.output));

        InvocationResult {
            phase,
            successful: false,
            code,
            crash_marker,
        }
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(Box::new(MarkerDetector::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InvocationError;

    #[test]
    fn error_code_pattern_compiles() {
        // Forces the lazily compiled pattern; a bad literal would panic here.
        assert!(ERROR_CODE_RE.is_match(b"\"code\":1"));
        assert!(!ERROR_CODE_RE.is_match(b"code 1"));
    }

    #[test]
    fn absent_error_is_success_with_zero_code() {
        let classifier = OutcomeClassifier::default();
        // Even a code marker in the output is ignored when the plugin succeeded.
        let invocation = InvocationOutput::success(b"{\"code\": 4}".to_vec());

        let result = classifier.classify(Phase::Add, &invocation);
        assert!(result.successful);
        assert_eq!(result.code, 0);
        assert!(!result.crash_marker);
        assert!(!result.is_suspected_crash());
    }

    #[test]
    fn structured_code_is_extracted_from_failure_output() {
        let classifier = OutcomeClassifier::default();
        let invocation = InvocationOutput::failure(
            b"{\n    \"code\": 7,\n    \"msg\": \"invalid config\"\n}".to_vec(),
            InvocationError::ExitCode(1),
        );

        let result = classifier.classify(Phase::Add, &invocation);
        assert!(!result.successful);
        assert_eq!(result.code, 7);
        assert!(!result.crash_marker);
        assert!(!result.is_suspected_crash());
    }

    #[test]
    fn unstructured_failure_defaults_to_code_zero() {
        let classifier = OutcomeClassifier::default();
        let invocation =
            InvocationOutput::failure(b"something broke".to_vec(), InvocationError::ExitCode(1));

        let result = classifier.classify(Phase::Del, &invocation);
        assert_eq!(result.phase, Phase::Del);
        assert!(!result.successful);
        assert_eq!(result.code, 0);
        assert!(result.is_suspected_crash());
    }

    #[test]
    fn crash_marker_is_found_case_insensitively_in_output() {
        let classifier = OutcomeClassifier::default();
        let invocation = InvocationOutput::failure(
            b"PANIC: runtime error: invalid memory address".to_vec(),
            InvocationError::ExitCode(2),
        );

        let result = classifier.classify(Phase::Add, &invocation);
        assert!(!result.successful);
        assert!(result.crash_marker);
    }

    #[test]
    fn crash_marker_is_found_in_error_text() {
        struct SignalWord;
        impl CrashSignalDetector for SignalWord {
            fn detect(&self, text: &str) -> bool {
                text.contains("signal")
            }
        }
        let classifier = OutcomeClassifier::new(Box::new(SignalWord));
        let invocation = InvocationOutput::failure(Vec::new(), InvocationError::Signal(11));

        let result = classifier.classify(Phase::Add, &invocation);
        assert!(result.crash_marker);
        assert_eq!(result.code, 0);
    }

    #[test]
    fn crash_marker_does_not_hide_structured_code() {
        let classifier = OutcomeClassifier::default();
        let invocation = InvocationOutput::failure(
            b"recovered from panic\n{\"code\": 100}".to_vec(),
            InvocationError::ExitCode(1),
        );

        let result = classifier.classify(Phase::Add, &invocation);
        assert_eq!(result.code, 100);
        assert!(result.crash_marker);
        assert!(result.is_suspected_crash());
    }

    #[test]
    fn extract_error_code_handles_spacing_and_garbage() {
        assert_eq!(extract_error_code(b"\"code\": 7"), Some(7));
        assert_eq!(extract_error_code(b"\"code\":12,\"msg\":\"x\""), Some(12));
        assert_eq!(extract_error_code(b"\"code\" :  3"), Some(3));
        assert_eq!(extract_error_code(b"\"code\": \"seven\""), None);
        assert_eq!(extract_error_code(b"code: 7"), None);
        assert_eq!(extract_error_code(b"\xff\xfe\"code\": 9\xff"), Some(9));
        assert_eq!(extract_error_code(b"\"code\": 99999999999999999999999"), None);
    }

    #[test]
    fn marker_detector_ignores_empty_markers() {
        let detector = MarkerDetector::new(["", "Fatal Error"]);
        assert!(detector.detect("fatal error: concurrent map writes"));
        assert!(!detector.detect("all good"));
    }
}
