use crate::error::HarnessError;
use crate::mutator::{
    DEFAULT_EXTERNAL_MUTATOR, DEFAULT_JSON_FIELD_CHANGE_PROBABILITY,
    DEFAULT_JSON_MAX_MUTATION_DEPTH,
};
use crate::oracle::DEFAULT_CRASH_MARKER;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What to do when DEL runs but reports failure after a successful ADD.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DelFailurePolicy {
    /// Record the failure, then end the session.
    #[default]
    Abort,
    /// Record the failure and keep going.
    Record,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Only write transcript entries for invocations that left a crash marker.
    #[serde(default)]
    pub panic_only: bool,
    #[serde(default)]
    pub del_failure: DelFailurePolicy,
    #[serde(default = "default_crash_markers")]
    pub crash_markers: Vec<String>,
}

pub fn default_iterations() -> u64 {
    100_000
}

fn default_crash_markers() -> Vec<String> {
    vec![DEFAULT_CRASH_MARKER.to_string()]
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            panic_only: false,
            del_failure: DelFailurePolicy::default(),
            crash_markers: default_crash_markers(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PluginSettings {
    #[serde(default = "default_plugin_path")]
    pub path: PathBuf,
    #[serde(default = "default_container_id")]
    pub container_id: String,
    #[serde(default = "default_ifname")]
    pub ifname: String,
    /// Defaults to the directory holding the plugin executable.
    #[serde(default)]
    pub search_path: Option<PathBuf>,
}

pub fn default_plugin_path() -> PathBuf {
    PathBuf::from("/opt/cni/bin/sriov")
}

fn default_container_id() -> String {
    "dummy".to_string()
}

fn default_ifname() -> String {
    "net1".to_string()
}

impl PluginSettings {
    pub fn effective_search_path(&self) -> PathBuf {
        if let Some(path) = &self.search_path {
            return path.clone();
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            path: default_plugin_path(),
            container_id: default_container_id(),
            ifname: default_ifname(),
            search_path: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedSettings {
    /// PCI address substituted into the built-in configuration template.
    pub device_id: Option<String>,
    /// Network configuration file; overrides `device_id` when both are set.
    pub config_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "engine",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
pub enum MutatorSettings {
    External {
        #[serde(default = "default_mutator_command")]
        command: Vec<String>,
    },
    Bytes {
        #[serde(default)]
        rng_seed: Option<u64>,
    },
    Json {
        #[serde(default)]
        rng_seed: Option<u64>,
        #[serde(default = "default_json_max_depth")]
        max_depth: usize,
        #[serde(default = "default_json_field_probability")]
        field_probability: f64,
    },
}

fn default_mutator_command() -> Vec<String> {
    vec![DEFAULT_EXTERNAL_MUTATOR.to_string()]
}

fn default_json_max_depth() -> usize {
    DEFAULT_JSON_MAX_MUTATION_DEPTH
}

fn default_json_field_probability() -> f64 {
    DEFAULT_JSON_FIELD_CHANGE_PROBABILITY
}

impl Default for MutatorSettings {
    fn default() -> Self {
        MutatorSettings::External {
            command: default_mutator_command(),
        }
    }
}

impl FromStr for MutatorSettings {
    type Err = HarnessError;

    /// Parses an engine name as accepted by `--mutator`, with default engine fields.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "external" | DEFAULT_EXTERNAL_MUTATOR => Ok(MutatorSettings::default()),
            "bytes" => Ok(MutatorSettings::Bytes { rng_seed: None }),
            "json" => Ok(MutatorSettings::Json {
                rng_seed: None,
                max_depth: default_json_max_depth(),
                field_probability: default_json_field_probability(),
            }),
            other => Err(HarnessError::Config(format!(
                "unknown mutation engine '{other}' (expected external, bytes or json)"
            ))),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TranscriptSettings {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct NamespaceSettings {
    /// Reuse this namespace instead of creating one.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_netns_run_dir")]
    pub run_dir: PathBuf,
}

pub fn default_netns_run_dir() -> PathBuf {
    PathBuf::from("/var/run/netns")
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            path: None,
            run_dir: default_netns_run_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub plugin: PluginSettings,
    #[serde(default)]
    pub seed: SeedSettings,
    #[serde(default)]
    pub mutator: MutatorSettings,
    #[serde(default)]
    pub transcript: TranscriptSettings,
    #[serde(default)]
    pub namespace: NamespaceSettings,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read config file at {path:?}: {e}"))
        })?;
        Self::from_toml(&content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse TOML from {path:?}: {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks the settings a session cannot start without.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.seed.device_id.is_none() && self.seed.config_path.is_none() {
            return Err(HarnessError::Config(
                "device has to be specified or config file has to be provided".to_string(),
            ));
        }
        if !self.plugin.path.is_file() {
            return Err(HarnessError::Config(format!(
                "plugin executable {:?} does not exist",
                self.plugin.path
            )));
        }
        match &self.mutator {
            MutatorSettings::External { command } if command.is_empty() => {
                return Err(HarnessError::Config(
                    "external mutation engine command is empty".to_string(),
                ));
            }
            MutatorSettings::Json {
                field_probability, ..
            } if !(*field_probability > 0.0 && *field_probability <= 1.0) => {
                return Err(HarnessError::Config(format!(
                    "json field-probability must be in (0, 1], got {field_probability}"
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plugin() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../test_targets/plugin_ok.sh")
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config.fuzzer.iterations, 100_000);
        assert!(!config.fuzzer.panic_only);
        assert_eq!(config.fuzzer.del_failure, DelFailurePolicy::Abort);
        assert_eq!(config.fuzzer.crash_markers, vec!["panic".to_string()]);
        assert_eq!(config.plugin.path, PathBuf::from("/opt/cni/bin/sriov"));
        assert_eq!(config.plugin.container_id, "dummy");
        assert_eq!(config.plugin.ifname, "net1");
        assert_eq!(config.mutator, MutatorSettings::default());
        assert_eq!(config.namespace.run_dir, PathBuf::from("/var/run/netns"));
    }

    #[test]
    fn full_file_is_parsed() {
        let config = HarnessConfig::from_toml(
            r#"
            [fuzzer]
            iterations = 25
            panic-only = true
            del-failure = "record"
            crash-markers = ["panic", "fatal error"]

            [plugin]
            path = "/usr/libexec/cni/sriov"
            container-id = "fuzz-ctr"
            ifname = "eth7"

            [seed]
            device-id = "0000:af:06.0"

            [mutator]
            engine = "json"
            rng-seed = 1234
            max-depth = 3

            [transcript]
            path = "/tmp/cnifuzz.log"

            [namespace]
            path = "/var/run/netns/existing"
            "#,
        )
        .unwrap();

        assert_eq!(config.fuzzer.iterations, 25);
        assert!(config.fuzzer.panic_only);
        assert_eq!(config.fuzzer.del_failure, DelFailurePolicy::Record);
        assert_eq!(config.fuzzer.crash_markers.len(), 2);
        assert_eq!(config.plugin.container_id, "fuzz-ctr");
        assert_eq!(config.plugin.ifname, "eth7");
        assert_eq!(config.seed.device_id.as_deref(), Some("0000:af:06.0"));
        assert_eq!(
            config.mutator,
            MutatorSettings::Json {
                rng_seed: Some(1234),
                max_depth: 3,
                field_probability: DEFAULT_JSON_FIELD_CHANGE_PROBABILITY,
            }
        );
        assert_eq!(
            config.transcript.path,
            Some(PathBuf::from("/tmp/cnifuzz.log"))
        );
        assert_eq!(
            config.namespace.path,
            Some(PathBuf::from("/var/run/netns/existing"))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(HarnessConfig::from_toml("[fuzzer]\nthreads = 4\n").is_err());
        assert!(HarnessConfig::from_toml("[bogus]\n").is_err());
    }

    #[test]
    fn search_path_defaults_to_plugin_directory() {
        let mut plugin = PluginSettings::default();
        assert_eq!(plugin.effective_search_path(), PathBuf::from("/opt/cni/bin"));

        plugin.path = PathBuf::from("sriov");
        assert_eq!(plugin.effective_search_path(), PathBuf::from("."));

        plugin.search_path = Some(PathBuf::from("/custom"));
        assert_eq!(plugin.effective_search_path(), PathBuf::from("/custom"));
    }

    #[test]
    fn validate_requires_device_or_config() {
        let mut config = HarnessConfig::default();
        config.plugin.path = test_plugin();
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);

        config.seed.device_id = Some("0000:00:00.0".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_plugin_and_empty_mutator() {
        let mut config = HarnessConfig::default();
        config.seed.device_id = Some("0000:00:00.0".to_string());
        config.plugin.path = PathBuf::from("/definitely/not/a/plugin");
        assert!(config.validate().is_err());

        config.plugin.path = test_plugin();
        config.mutator = MutatorSettings::External { command: vec![] };
        assert!(config.validate().is_err());

        config.mutator = MutatorSettings::Json {
            rng_seed: None,
            max_depth: 4,
            field_probability: 1.5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mutator_names_parse() {
        assert_eq!(
            "radamsa".parse::<MutatorSettings>().unwrap(),
            MutatorSettings::default()
        );
        assert_eq!(
            "bytes".parse::<MutatorSettings>().unwrap(),
            MutatorSettings::Bytes { rng_seed: None }
        );
        assert!(matches!(
            "json".parse::<MutatorSettings>(),
            Ok(MutatorSettings::Json { .. })
        ));
        assert!("afl".parse::<MutatorSettings>().is_err());
    }
}
