use crate::model::SensorHandle;
use crate::status::Status;


/// Sent by the scanner and client tasks to the window.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorSignal {
    SensorsDiscovered(Vec<SensorHandle>),
    /// Inter-beat intervals in milliseconds, oldest first.
    Ibis(Vec<u16>),
    Status(Status),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScannerCommand {
    Scan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Connect(SensorHandle),
    Disconnect,
}
