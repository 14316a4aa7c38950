use crate::oracle::InvocationResult;
use crate::session::SessionTally;
use std::collections::BTreeMap;
use std::fmt;

/// Occurrences of each structured error code among failed invocations.
///
/// Code 0 collects failures without a structured code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorHistogram {
    counts: BTreeMap<i64, usize>,
}

impl ErrorHistogram {
    pub fn from_failures<'a>(failures: impl IntoIterator<Item = &'a InvocationResult>) -> Self {
        let mut counts = BTreeMap::new();
        for failure in failures {
            *counts.entry(failure.code).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn get(&self, code: i64) -> usize {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    /// Sum of all buckets; equals the number of failures it was built from.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Buckets in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.counts.iter().map(|(code, count)| (*code, *count))
    }
}

/// Aggregate view of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub suspected_crashes: usize,
    pub histogram: ErrorHistogram,
}

pub fn summarize(tally: &SessionTally) -> SessionSummary {
    let failures = tally.failures();
    SessionSummary {
        total: tally.total(),
        succeeded: tally.successes().len(),
        failed: failures.len(),
        suspected_crashes: failures.iter().filter(|r| r.is_suspected_crash()).count(),
        histogram: ErrorHistogram::from_failures(failures),
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performed {} tests of which:", self.total)?;
        writeln!(f, "{} failed", self.failed)?;
        writeln!(f, "{} succeeded", self.succeeded)?;
        writeln!(f)?;
        writeln!(f, "Errors by error code:")?;
        for (code, count) in self.histogram.iter() {
            writeln!(f, "Code: {code}\tErrors:\t{count}")?;
        }
        write!(f, "Suspected crashes: {}", self.suspected_crashes)
    }
}
