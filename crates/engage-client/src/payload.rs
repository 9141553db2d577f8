//! JSON payload builders.

use crate::{AppLoginParameters, DeviceInfo};
use serde_json::{Map, Value};

/// Fields present on every request: application and hardware ids, plus the
/// contact fields once login parameters are known.
pub(crate) fn base_payload(
    application_code: &str,
    hardware_id: &str,
    login: Option<&AppLoginParameters>,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("application_id".into(), Value::from(application_code));
    payload.insert("hardware_id".into(), Value::from(hardware_id));
    if let Some(login) = login {
        payload.insert("contact_field_id".into(), Value::from(login.contact_field_id));
        payload.insert(
            "contact_field_value".into(),
            Value::from(login.contact_field_value.as_str()),
        );
    }
    payload
}

/// Base payload extended with the device description, SDK version and push
/// token. A missing token is sent as `false`.
pub(crate) fn login_payload(
    mut base: Map<String, Value>,
    device: &DeviceInfo,
    sdk_version: &str,
    push_token: Option<&str>,
) -> Map<String, Value> {
    base.insert("platform".into(), Value::from(device.platform.as_str()));
    base.insert("language".into(), Value::from(device.language.as_str()));
    base.insert("timezone".into(), Value::from(device.timezone.as_str()));
    base.insert("device_model".into(), Value::from(device.device_model.as_str()));
    base.insert(
        "application_version".into(),
        Value::from(device.application_version.as_str()),
    );
    base.insert("os_version".into(), Value::from(device.os_version.as_str()));
    base.insert("ems_sdk".into(), Value::from(sdk_version));
    base.insert(
        "push_token".into(),
        push_token.map_or(Value::Bool(false), Value::from),
    );
    base
}
