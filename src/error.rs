use thiserror::Error;


/// Why a connect click did not reach the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Invalid sensor address: {0}.")]
    InvalidAddress(String),
    #[error("No sensor with address {0}, please scan again.")]
    NotFound(String),
    #[error("{count} sensors share address {address}, please scan again.")]
    Ambiguous { address: String, count: usize },
}

/// Failures of the BLE collaborators, reported to the window as error statuses.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("No Bluetooth adapter found.")]
    AdapterNotFound,
    #[error("Sensor {0} is no longer available.")]
    PeripheralNotFound(String),
    #[error("Sensor {0} does not offer heart rate notifications.")]
    HrCharNotFound(String),
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_read_as_status_text() {
        let err = ConnectError::InvalidAddress("AA:11".into());
        assert_eq!(err.to_string(), "Invalid sensor address: AA:11.");

        let err = ConnectError::Ambiguous { address: "AA:BB:CC:DD:EE:FF".into(), count: 2 };
        assert_eq!(err.to_string(), "2 sensors share address AA:BB:CC:DD:EE:FF, please scan again.");
    }
}
