use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity bounds for the twin engine.
///
/// The bounds are explicit configuration, not hidden constants: registries
/// refuse registration once full and the report queue rejects pushes past
/// its capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinConfig {
    pub command_capacity: usize,
    pub desired_capacity: usize,
    pub report_queue_capacity: usize,
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            command_capacity: 32,
            desired_capacity: 32,
            report_queue_capacity: 16,
        }
    }
}

impl TwinConfig {
    pub fn sanitize(&mut self) {
        self.command_capacity = self.command_capacity.max(1);
        self.desired_capacity = self.desired_capacity.max(1);
        self.report_queue_capacity = self.report_queue_capacity.max(1);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("connection string is missing the {0} field")]
    MissingField(&'static str),
    #[error("connection string field {0} is empty")]
    EmptyField(&'static str),
}

/// Identity of the device and the hub it talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubConfig {
    pub hostname: String,
    pub device_id: String,
    pub shared_access_key: String,
    pub mqtt_port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            device_id: "devkit".to_string(),
            shared_access_key: String::new(),
            mqtt_port: 1883,
        }
    }
}

impl HubConfig {
    /// Parses a `HostName=...;DeviceId=...;SharedAccessKey=...` connection
    /// string as provisioned for the device.
    pub fn from_connection_string(raw: &str) -> Result<Self, ConnectionStringError> {
        let mut hostname = None;
        let mut device_id = None;
        let mut shared_access_key = None;

        for part in raw.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "HostName" => hostname = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                // The key itself may contain '='; split_once keeps the rest.
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => {}
            }
        }

        let hostname = hostname.ok_or(ConnectionStringError::MissingField("HostName"))?;
        let device_id = device_id.ok_or(ConnectionStringError::MissingField("DeviceId"))?;
        let shared_access_key =
            shared_access_key.ok_or(ConnectionStringError::MissingField("SharedAccessKey"))?;

        if hostname.is_empty() {
            return Err(ConnectionStringError::EmptyField("HostName"));
        }
        if device_id.is_empty() {
            return Err(ConnectionStringError::EmptyField("DeviceId"));
        }

        Ok(Self {
            hostname,
            device_id,
            shared_access_key,
            mqtt_port: 1883,
        })
    }

    /// Short hub name: the hostname up to its first dot.
    pub fn hub_name(&self) -> &str {
        self.hostname
            .split_once('.')
            .map(|(name, _)| name)
            .unwrap_or(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_connection_string() {
        let config = HubConfig::from_connection_string(
            "HostName=myhub.azure-devices.net;DeviceId=AZ3166;SharedAccessKey=c2VjcmV0PT0=",
        )
        .unwrap();

        assert_eq!(config.hostname, "myhub.azure-devices.net");
        assert_eq!(config.device_id, "AZ3166");
        assert_eq!(config.shared_access_key, "c2VjcmV0PT0=");
        assert_eq!(config.hub_name(), "myhub");
    }

    #[test]
    fn rejects_missing_fields() {
        let err = HubConfig::from_connection_string("HostName=myhub.azure-devices.net")
            .unwrap_err();
        assert_eq!(err, ConnectionStringError::MissingField("DeviceId"));

        let err = HubConfig::from_connection_string("DeviceId=dev;SharedAccessKey=k").unwrap_err();
        assert_eq!(err, ConnectionStringError::MissingField("HostName"));
    }

    #[test]
    fn field_order_does_not_matter() {
        let config = HubConfig::from_connection_string(
            "SharedAccessKey=k;HostName=hub.example.com;DeviceId=dev",
        )
        .unwrap();
        assert_eq!(config.device_id, "dev");
        assert_eq!(config.hub_name(), "hub");
    }

    #[test]
    fn sanitize_keeps_capacities_positive() {
        let mut config = TwinConfig {
            command_capacity: 0,
            desired_capacity: 0,
            report_queue_capacity: 0,
        };
        config.sanitize();
        assert_eq!(config.command_capacity, 1);
        assert_eq!(config.report_queue_capacity, 1);
    }
}
