use crate::config::MutatorSettings;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde_json::{Number as JsonNumber, Value as JsonValue};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;
use thiserror::Error;

/// Defines a probability for a field to change during JSON mutation, if not overridden.
pub const DEFAULT_JSON_FIELD_CHANGE_PROBABILITY: f64 = 0.5;
/// Defines a probability for a specific value mutation (string char change, number delta) to occur.
const DEFAULT_JSON_VALUE_MUTATION_PROBABILITY: f64 = 0.5;
/// Defines the default maximum recursion depth for `JsonFieldMutator`.
pub const DEFAULT_JSON_MAX_MUTATION_DEPTH: usize = 10;
/// Mutation engine used when nothing else is configured.
pub const DEFAULT_EXTERNAL_MUTATOR: &str = "radamsa";

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("failed to start mutation engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("mutation engine `{program}` failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("mutation engine I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A `MutationSource` turns a seed configuration into a new, possibly malformed one.
///
/// The output has no guaranteed relationship to the input: it may be truncated,
/// duplicated, bit-flipped, or not valid JSON at all. Callers must not assume
/// two calls with the same seed agree.
pub trait MutationSource {
    fn mutate(&mut self, seed: &[u8]) -> Result<Vec<u8>, MutationError>;
}

impl<T: MutationSource + ?Sized> MutationSource for Box<T> {
    fn mutate(&mut self, seed: &[u8]) -> Result<Vec<u8>, MutationError> {
        (**self).mutate(seed)
    }
}

/// Delegates mutation to an external tool that reads the seed on stdin and
/// writes the mutated bytes to stdout (radamsa by default).
#[derive(Debug, Clone)]
pub struct ExternalMutator {
    command: Vec<String>,
}

impl ExternalMutator {
    /// `command[0]` is the program, the rest are its arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }
}

impl Default for ExternalMutator {
    fn default() -> Self {
        Self::new(vec![DEFAULT_EXTERNAL_MUTATOR.to_string()])
    }
}

impl MutationSource for ExternalMutator {
    fn mutate(&mut self, seed: &[u8]) -> Result<Vec<u8>, MutationError> {
        let program = self.program().to_string();
        let mut child = Command::new(&program)
            .args(self.command.iter().skip(1))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MutationError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let payload = seed.to_vec();
        let feeder = thread::spawn(move || -> io::Result<()> {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload) {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        });

        let output = child.wait_with_output()?;
        feeder
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("mutator stdin thread panicked")))?;

        if !output.status.success() {
            return Err(MutationError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// In-process byte-level mutator for hosts without an external engine.
///
/// Each call applies one randomly chosen edit: add a small value to a byte,
/// flip a bit, truncate, duplicate a slice, or insert a random byte.
/// If the seed is empty, it first creates a single zero byte.
#[derive(Debug, Clone)]
pub struct ByteFlipMutator<R: Rng = ChaCha8Rng> {
    rng: R,
}

impl ByteFlipMutator<ChaCha8Rng> {
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> ByteFlipMutator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

fn mutate_bytes<R: Rng + ?Sized>(bytes: &mut Vec<u8>, rng: &mut R) {
    if bytes.is_empty() {
        // Ensure there's at least one byte to mutate
        bytes.push(0);
    }
    let index = rng.random_range(0..bytes.len());
    match rng.random_range(0..5u8) {
        0 => {
            let random_add_value = rng.random_range(1u8..=15u8);
            bytes[index] = bytes[index].wrapping_add(random_add_value);
        }
        1 => {
            let bit = rng.random_range(0..8u8);
            bytes[index] ^= 1u8 << bit;
        }
        2 => bytes.truncate(index),
        3 => {
            let end = rng.random_range(index..=bytes.len());
            let duplicate = bytes[index..end].to_vec();
            let tail = bytes.split_off(end);
            bytes.extend_from_slice(&duplicate);
            bytes.extend_from_slice(&tail);
        }
        _ => bytes.insert(index, rng.random()),
    }
}

impl<R: Rng> MutationSource for ByteFlipMutator<R> {
    fn mutate(&mut self, seed: &[u8]) -> Result<Vec<u8>, MutationError> {
        let mut bytes = seed.to_vec();
        mutate_bytes(&mut bytes, &mut self.rng);
        Ok(bytes)
    }
}

/// A structure-aware mutator that parses the seed as JSON, alters values in
/// place and serialises the result.
///
/// This keeps the payload syntactically valid more often than byte-level edits,
/// which pushes the plugin past its JSON decoding into field validation. Seeds
/// that are not valid JSON get a byte-level edit instead.
#[derive(Debug, Clone)]
pub struct JsonFieldMutator<R: Rng = ChaCha8Rng> {
    rng: R,
    /// Maximum recursion depth when mutating nested JSON structures (objects/arrays).
    max_mutation_depth: usize,
    /// Probability (0.0 to 1.0) that a field within a JSON object or an element
    /// within a JSON array will be selected for further mutation.
    field_recurse_probability: f64,
}

impl<R: Rng> JsonFieldMutator<R> {
    pub fn new(rng: R, max_mutation_depth: usize, field_recurse_probability: f64) -> Self {
        Self {
            rng,
            max_mutation_depth: if max_mutation_depth == 0 {
                DEFAULT_JSON_MAX_MUTATION_DEPTH
            } else {
                max_mutation_depth
            },
            field_recurse_probability: if field_recurse_probability <= 0.0
                || field_recurse_probability > 1.0
            {
                DEFAULT_JSON_FIELD_CHANGE_PROBABILITY
            } else {
                field_recurse_probability
            },
        }
    }

    /// Recursively mutates a `serde_json::Value`.
    fn mutate_json_value(&mut self, value: &mut JsonValue, current_depth: usize) {
        if current_depth >= self.max_mutation_depth {
            return;
        }

        match value {
            JsonValue::Object(map) => {
                for (_key, val) in map.iter_mut() {
                    if self.rng.random_bool(self.field_recurse_probability) {
                        self.mutate_json_value(val, current_depth + 1);
                    }
                }
            }
            JsonValue::Array(arr) => {
                for val in arr.iter_mut() {
                    if self.rng.random_bool(self.field_recurse_probability) {
                        self.mutate_json_value(val, current_depth + 1);
                    }
                }
            }
            JsonValue::String(s) => {
                if !s.is_empty() && self.rng.random_bool(DEFAULT_JSON_VALUE_MUTATION_PROBABILITY) {
                    let mut chars: Vec<char> = s.chars().collect();
                    let idx = self.rng.random_range(0..chars.len());

                    // Mutation: change case or pick a random printable ASCII char
                    if chars[idx].is_ascii_alphabetic() && self.rng.random_bool(0.5) {
                        if chars[idx].is_ascii_lowercase() {
                            chars[idx] = chars[idx].to_ascii_uppercase();
                        } else {
                            chars[idx] = chars[idx].to_ascii_lowercase();
                        }
                    } else {
                        chars[idx] = self.rng.random_range(32u8..127u8) as char;
                    }
                    *s = chars.into_iter().collect();
                }
            }
            JsonValue::Number(n) => {
                if self.rng.random_bool(DEFAULT_JSON_VALUE_MUTATION_PROBABILITY) {
                    if let Some(val_i64) = n.as_i64() {
                        let delta = self.rng.random_range(-5i64..=5i64);
                        *n = JsonNumber::from(val_i64.saturating_add(delta));
                    } else if let Some(val_u64) = n.as_u64() {
                        let delta = self.rng.random_range(0u64..=5u64);
                        *n = JsonNumber::from(val_u64.saturating_add(delta));
                    } else if let Some(val_f64) = n.as_f64() {
                        let delta: f64 = self.rng.random_range(-1.0..1.0);
                        *n = JsonNumber::from_f64(val_f64 + delta)
                            .unwrap_or_else(|| JsonNumber::from(0));
                    }
                }
            }
            JsonValue::Bool(b) => {
                if self.rng.random_bool(DEFAULT_JSON_VALUE_MUTATION_PROBABILITY) {
                    *b = !*b;
                }
            }
            JsonValue::Null => {}
        }
    }
}

impl<R: Rng> MutationSource for JsonFieldMutator<R> {
    fn mutate(&mut self, seed: &[u8]) -> Result<Vec<u8>, MutationError> {
        let Ok(mut value) = serde_json::from_slice::<JsonValue>(seed) else {
            let mut bytes = seed.to_vec();
            mutate_bytes(&mut bytes, &mut self.rng);
            return Ok(bytes);
        };
        self.mutate_json_value(&mut value, 0);
        serde_json::to_vec(&value).map_err(|e| MutationError::Io(io::Error::other(e)))
    }
}

/// Builds the mutation engine selected by configuration.
pub fn from_settings(settings: &MutatorSettings) -> Box<dyn MutationSource> {
    let rng_for = |seed: Option<u64>| match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };
    match settings {
        MutatorSettings::External { command } => Box::new(ExternalMutator::new(command.clone())),
        MutatorSettings::Bytes { rng_seed } => {
            Box::new(ByteFlipMutator::with_rng(rng_for(*rng_seed)))
        }
        MutatorSettings::Json {
            rng_seed,
            max_depth,
            field_probability,
        } => Box::new(JsonFieldMutator::new(
            rng_for(*rng_seed),
            *max_depth,
            *field_probability,
        )),
    }
}
