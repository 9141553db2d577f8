//! Device description sent with logins.

use serde::{Deserialize, Serialize};

/// Properties of the device the client runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub language: String,
    /// UTC offset, e.g. "+0200".
    pub timezone: String,
    pub device_model: String,
    pub application_version: String,
    pub os_version: String,
}

impl DeviceInfo {
    /// Describe the current host.
    pub fn detect(application_version: impl Into<String>) -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            language: detect_language(),
            timezone: chrono::Local::now().format("%z").to_string(),
            device_model: std::env::consts::ARCH.to_string(),
            application_version: application_version.into(),
            os_version: std::env::consts::FAMILY.to_string(),
        }
    }
}

/// Language tag from the POSIX locale variables, `en-US` style.
fn detect_language() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
        .map(|value| locale_to_language_tag(&value))
        .unwrap_or_else(|| "en-US".to_string())
}

fn locale_to_language_tag(locale: &str) -> String {
    let without_encoding = locale.split(['.', '@']).next().unwrap_or(locale);
    without_encoding.replace('_', "-")
}
