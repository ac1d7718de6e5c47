//! MQTT topic conventions used by the hub.
//!
//! Twin traffic and direct methods ride on the reserved `$iothub/` space;
//! cloud-to-device messages and telemetry use the per-device `devices/`
//! space.

pub const TOPIC_TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
pub const TOPIC_DESIRED_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
pub const TOPIC_METHOD_POST_FILTER: &str = "$iothub/methods/POST/#";

pub const TOPIC_TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
pub const TOPIC_DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
pub const TOPIC_METHOD_POST_PREFIX: &str = "$iothub/methods/POST/";

pub fn twin_get_topic(rid: u64) -> String {
    format!("$iothub/twin/GET/?$rid={rid}")
}

pub fn reported_patch_topic(rid: u64) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
}

pub fn method_response_topic(status: i32, rid: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={rid}")
}

pub fn devicebound_filter(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

pub fn devicebound_prefix(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/")
}

pub fn telemetry_topic(device_id: &str) -> String {
    format!("devices/{device_id}/messages/events/")
}

/// Splits a `$iothub/methods/POST/<name>/?$rid=<rid>` topic into the method
/// name and request id.
pub fn parse_method_invocation(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix(TOPIC_METHOD_POST_PREFIX)?;
    let (name, query) = rest.split_once("/?")?;
    Some((name, rid_of(query)?))
}

/// Splits a `$iothub/twin/res/<status>/?$rid=<rid>` topic into the response
/// status and request id.
pub fn parse_twin_response(topic: &str) -> Option<(u16, &str)> {
    let rest = topic.strip_prefix(TOPIC_TWIN_RESPONSE_PREFIX)?;
    let (status, query) = rest.split_once("/?")?;
    Some((status.parse().ok()?, rid_of(query)?))
}

pub fn is_desired_patch(topic: &str) -> bool {
    topic.starts_with(TOPIC_DESIRED_PATCH_PREFIX)
}

fn rid_of(query: &str) -> Option<&str> {
    let rest = query.split_once("$rid=")?.1;
    Some(rest.split('&').next().unwrap_or(rest))
}
