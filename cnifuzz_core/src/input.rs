use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

pub const ENV_COMMAND: &str = "CNI_COMMAND";
pub const ENV_CONTAINER_ID: &str = "CNI_CONTAINERID";
pub const ENV_NETNS: &str = "CNI_NETNS";
pub const ENV_IFNAME: &str = "CNI_IFNAME";
pub const ENV_PATH: &str = "CNI_PATH";

/// The lifecycle step a plugin invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Create the network attachment.
    Add,
    /// Release whatever the paired `Add` created.
    Del,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Add => "ADD",
            Phase::Del => "DEL",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a plugin receives for one ADD/DEL pair.
///
/// The same value is handed to both phases of an iteration, so the DEL call
/// sees exactly the payload and identifiers the ADD call saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationArguments {
    pub container_id: String,
    /// Path of the network namespace the plugin should operate in.
    pub netns: PathBuf,
    pub ifname: String,
    /// Directory the plugin searches for delegate plugins.
    pub search_path: PathBuf,
    /// Network configuration delivered verbatim on stdin.
    pub stdin_data: Vec<u8>,
}

impl InvocationArguments {
    /// Environment variables that carry the phase and the four identifying fields.
    pub fn env_vars(&self, phase: Phase) -> Vec<(&'static str, OsString)> {
        vec![
            (ENV_COMMAND, OsString::from(phase.as_str())),
            (ENV_CONTAINER_ID, OsString::from(&self.container_id)),
            (ENV_NETNS, self.netns.clone().into_os_string()),
            (ENV_IFNAME, OsString::from(&self.ifname)),
            (ENV_PATH, self.search_path.clone().into_os_string()),
        ]
    }

    /// MD5 hex digest of the payload, used to correlate transcript entries.
    pub fn payload_digest(&self) -> String {
        format!("{:x}", md5::compute(&self.stdin_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> InvocationArguments {
        InvocationArguments {
            container_id: "dummy".to_string(),
            netns: PathBuf::from("/var/run/netns/test"),
            ifname: "net1".to_string(),
            search_path: PathBuf::from("/opt/cni/bin"),
            stdin_data: b"{\"type\":\"sriov\"}".to_vec(),
        }
    }

    #[test]
    fn env_vars_carry_phase_and_identifiers() {
        let args = sample_args();
        let env = args.env_vars(Phase::Del);
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string_lossy().into_owned())
        };

        assert_eq!(env.len(), 5);
        assert_eq!(lookup(ENV_COMMAND).as_deref(), Some("DEL"));
        assert_eq!(lookup(ENV_CONTAINER_ID).as_deref(), Some("dummy"));
        assert_eq!(lookup(ENV_NETNS).as_deref(), Some("/var/run/netns/test"));
        assert_eq!(lookup(ENV_IFNAME).as_deref(), Some("net1"));
        assert_eq!(lookup(ENV_PATH).as_deref(), Some("/opt/cni/bin"));
    }

    #[test]
    fn payload_digest_is_md5_of_stdin_data() {
        let args = sample_args();
        let expected = format!("{:x}", md5::compute(b"{\"type\":\"sriov\"}"));
        assert_eq!(args.payload_digest(), expected);
    }

    #[test]
    fn phase_renders_protocol_names() {
        assert_eq!(Phase::Add.to_string(), "ADD");
        assert_eq!(Phase::Del.as_str(), "DEL");
    }
}
