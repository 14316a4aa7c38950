use crate::config::SeedSettings;
use crate::error::HarnessError;
use serde_json::json;

pub const TEMPLATE_CNI_VERSION: &str = "0.3.0";
pub const TEMPLATE_NETWORK_NAME: &str = "sriov-net-test";
pub const TEMPLATE_PLUGIN_TYPE: &str = "sriov";

/// Renders the built-in SR-IOV network configuration for `device_id`.
pub fn render_template(device_id: &str) -> Vec<u8> {
    let conf = json!({
        "cniVersion": TEMPLATE_CNI_VERSION,
        "deviceID": device_id,
        "name": TEMPLATE_NETWORK_NAME,
        "spoofchk": "off",
        "type": TEMPLATE_PLUGIN_TYPE,
    });
    // Rendering a `Value` built from string literals cannot fail.
    serde_json::to_vec_pretty(&conf).unwrap_or_default()
}

/// Produces the seed configuration: the operator's file when given, otherwise
/// the template for the configured device.
pub fn load_seed(settings: &SeedSettings) -> Result<Vec<u8>, HarnessError> {
    if let Some(path) = &settings.config_path {
        return std::fs::read(path).map_err(|source| HarnessError::SeedRead {
            path: path.clone(),
            source,
        });
    }
    match &settings.device_id {
        Some(device_id) => Ok(render_template(device_id)),
        None => Err(HarnessError::Config(
            "device has to be specified or config file has to be provided".to_string(),
        )),
    }
}
