use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

use tracing::debug;


pub const DEFAULT_IBI_BUFFER_SIZE: usize = 60;

/// A discovered sensor, identified by the address the platform reports for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorHandle {
    pub name: String,
    pub address: String,
}

impl SensorHandle {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        SensorHandle {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Names and addresses of the known sensors, kept in lock-step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList {
    pub names: Vec<String>,
    pub addresses: Vec<String>,
}

impl AddressList {
    fn from_sensors(sensors: &[SensorHandle]) -> Self {
        let (names, addresses) = sensors
            .iter()
            .map(|s| (s.name.clone(), s.address.clone()))
            .unzip();

        AddressList { names, addresses }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn entries(&self) -> Vec<String> {
        self.names
            .iter()
            .zip(&self.addresses)
            .map(|(name, address)| format!("{name}, {address}"))
            .collect()
    }
}

pub struct Model {
    sensors: Vec<SensorHandle>,
    ibis: VecDeque<u16>,
    ibi_buffer_size: usize,
    address_listeners: Vec<Sender<AddressList>>,
}

impl Model {
    pub fn new(ibi_buffer_size: usize) -> Self {
        Model {
            sensors: vec![],
            ibis: VecDeque::new(),
            ibi_buffer_size: ibi_buffer_size.max(1),
            address_listeners: vec![],
        }
    }

    /// Every later [`Model::set_sensors`] publishes the new address list on the returned receiver.
    pub fn subscribe_addresses(&mut self) -> Receiver<AddressList> {
        let (tx, rx) = channel();
        self.address_listeners.push(tx);
        rx
    }

    pub fn sensors(&self) -> &[SensorHandle] {
        &self.sensors
    }

    pub fn set_sensors(&mut self, sensors: Vec<SensorHandle>) {
        self.sensors = sensors;
        let addresses = AddressList::from_sensors(&self.sensors);
        debug!(count = addresses.len(), "publishing sensor addresses");

        // Listeners whose receiver is gone are dropped.
        self.address_listeners
            .retain(|listener| listener.send(addresses.clone()).is_ok());
    }

    /// Appends fresh intervals, discarding the oldest once the buffer is full.
    pub fn set_ibis_buffer(&mut self, ibis: Vec<u16>) {
        self.ibis.extend(ibis);
        while self.ibis.len() > self.ibi_buffer_size {
            self.ibis.pop_front();
        }
    }

    pub fn ibis(&self) -> impl Iterator<Item = u16> + '_ {
        self.ibis.iter().copied()
    }

    /// Beats per minute of the most recent interval.
    pub fn heart_rate(&self) -> Option<u16> {
        self.ibis
            .back()
            .filter(|ibi| **ibi > 0)
            .map(|ibi| (60_000 / u32::from(*ibi)) as u16)
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::new(DEFAULT_IBI_BUFFER_SIZE)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn polar_sensors() -> Vec<SensorHandle> {
        vec![
            SensorHandle::new("Polar H10 1A2B3C4D", "A0:9E:1A:00:00:01"),
            SensorHandle::new("Polar H9 5E6F7A8B", "A0:9E:1A:00:00:02"),
        ]
    }

    #[test]
    fn publishes_addresses_in_sensor_order() {
        let mut model = Model::default();
        let rx = model.subscribe_addresses();

        model.set_sensors(polar_sensors());

        let list = rx.try_recv().unwrap();
        assert_eq!(list.names, vec!["Polar H10 1A2B3C4D", "Polar H9 5E6F7A8B"]);
        assert_eq!(list.addresses, vec!["A0:9E:1A:00:00:01", "A0:9E:1A:00:00:02"]);
        assert_eq!(
            list.entries(),
            vec![
                "Polar H10 1A2B3C4D, A0:9E:1A:00:00:01",
                "Polar H9 5E6F7A8B, A0:9E:1A:00:00:02",
            ]
        );
    }

    #[test]
    fn empty_scan_publishes_empty_list() {
        let mut model = Model::default();
        let rx = model.subscribe_addresses();
        model.set_sensors(polar_sensors());
        model.set_sensors(vec![]);

        assert_eq!(rx.try_recv().unwrap().len(), 2);
        assert!(rx.try_recv().unwrap().is_empty());
        assert!(model.sensors().is_empty());
    }

    #[test]
    fn dropped_listener_is_forgotten() {
        let mut model = Model::default();
        drop(model.subscribe_addresses());
        let rx = model.subscribe_addresses();

        model.set_sensors(polar_sensors());

        assert_eq!(model.address_listeners.len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn ibi_buffer_is_bounded() {
        let mut model = Model::new(3);
        model.set_ibis_buffer(vec![1000, 990]);
        model.set_ibis_buffer(vec![980, 970]);

        assert_eq!(model.ibis().collect::<Vec<_>>(), vec![990, 980, 970]);
    }

    #[test]
    fn huge_buffer_size_allocates_lazily() {
        let mut model = Model::new(usize::MAX);
        model.set_ibis_buffer(vec![900, 910]);

        assert_eq!(model.ibis().collect::<Vec<_>>(), vec![900, 910]);
    }

    #[test]
    fn heart_rate_follows_latest_interval() {
        let mut model = Model::default();
        assert_eq!(model.heart_rate(), None);

        model.set_ibis_buffer(vec![1000, 800]);
        assert_eq!(model.heart_rate(), Some(75));

        model.set_ibis_buffer(vec![0]);
        assert_eq!(model.heart_rate(), None);
    }
}
