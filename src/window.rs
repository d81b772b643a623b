//! The main window's behavior, independent of how it is drawn.
//!
//! [`MainWindow`] relays button clicks to the scanner and client ports and folds their
//! [`SensorSignal`]s back into the [`Model`], the address drop-down and the status bar.
//! Everything here runs on the UI thread: the egui app drains the signal channel once
//! per frame and calls [`MainWindow::handle_signal`] for each signal in arrival order.

use std::sync::mpsc::Receiver;

use tracing::{debug, error, info, warn};

use crate::address::valid_address;
use crate::error::ConnectError;
use crate::model::{AddressList, Model, SensorHandle};
use crate::signal::SensorSignal;
use crate::status::{Severity, Status};


pub const WINDOW_TITLE: &str = "Connect the HR-ECG Sensor";
pub const WINDOW_POSITION: [f32; 2] = [300.0, 300.0];
pub const WINDOW_SIZE: [f32; 2] = [750.0, 450.0];

pub trait ScanPort {
    fn scan(&self);
}

pub trait ClientPort {
    fn connect(&self, sensor: SensorHandle);
    fn disconnect(&self);
}

/// Diagnostic output that mirrors what the status bar shows.
pub trait Console {
    fn write(&mut self, severity: Severity, message: &str);
}

pub struct TracingConsole;

impl Console for TracingConsole {
    fn write(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "hrconnect::console", "{message}"),
            Severity::Warning => warn!(target: "hrconnect::console", "{message}"),
            Severity::Error => error!(target: "hrconnect::console", "{message}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct AddressMenu {
    entries: Vec<String>,
    selected: Option<usize>,
}

impl AddressMenu {
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn select(&mut self, index: usize) {
        if index < self.entries.len() {
            self.selected = Some(index);
        }
    }

    pub fn current_text(&self) -> Option<&str> {
        self.selected
            .and_then(|index| self.entries.get(index))
            .map(String::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Like a combo box, a freshly filled menu points at its first entry.
    fn replace(&mut self, entries: Vec<String>) {
        self.selected = if entries.is_empty() { None } else { Some(0) };
        self.entries = entries;
    }
}

/// Address part of a `"<name>, <address>"` menu entry.
fn parse_address(entry: &str) -> &str {
    match entry.split_once(',') {
        Some((_name, address)) => address.trim(),
        None => entry.trim(),
    }
}

pub struct MainWindow<S, C, K> {
    model: Model,
    addresses_rx: Receiver<AddressList>,
    scanner: S,
    client: C,
    console: K,
    address_menu: AddressMenu,
    status: Option<Status>,
}

impl<S: ScanPort, C: ClientPort, K: Console> MainWindow<S, C, K> {
    pub fn new(mut model: Model, scanner: S, client: C, console: K) -> Self {
        let addresses_rx = model.subscribe_addresses();

        MainWindow {
            model,
            addresses_rx,
            scanner,
            client,
            console,
            address_menu: AddressMenu::default(),
            status: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn address_menu(&self) -> &AddressMenu {
        &self.address_menu
    }

    pub fn address_menu_mut(&mut self) -> &mut AddressMenu {
        &mut self.address_menu
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn handle_signal(&mut self, signal: SensorSignal) {
        match signal {
            SensorSignal::SensorsDiscovered(sensors) => {
                self.model.set_sensors(sensors);
                self.sync_addresses();
            }
            SensorSignal::Ibis(ibis) => self.model.set_ibis_buffer(ibis),
            SensorSignal::Status(status) => self.on_status(status),
        }
    }

    /// Applies every address list the model published since the last call.
    pub fn sync_addresses(&mut self) {
        while let Ok(addresses) = self.addresses_rx.try_recv() {
            self.on_address_list_changed(addresses);
        }
    }

    pub fn on_scan_clicked(&self) {
        debug!("scan clicked");
        self.scanner.scan();
    }

    pub fn on_connect_clicked(&mut self) {
        match self.selected_sensor() {
            Ok(Some(sensor)) => {
                debug!(address = %sensor.address, "connect clicked");
                self.client.connect(sensor);
            }
            Ok(None) => {}
            Err(err @ ConnectError::InvalidAddress(_)) => {
                self.console.write(Severity::Warning, &err.to_string());
            }
            Err(err) => self.on_status(Status::error(err.to_string())),
        }
    }

    pub fn on_disconnect_clicked(&self) {
        debug!("disconnect clicked");
        self.client.disconnect();
    }

    pub fn on_address_list_changed(&mut self, addresses: AddressList) {
        if addresses.is_empty() {
            debug!("address list cleared");
        }
        self.address_menu.replace(addresses.entries());
    }

    pub fn on_status(&mut self, status: Status) {
        if status.echo {
            self.console.write(status.severity, &status.text);
        }
        self.status = Some(status);
    }

    /// The sensor behind the current menu entry, `None` when nothing is selected.
    fn selected_sensor(&self) -> Result<Option<SensorHandle>, ConnectError> {
        let Some(entry) = self.address_menu.current_text() else { return Ok(None); };

        let address = parse_address(entry);
        if !valid_address(address) {
            return Err(ConnectError::InvalidAddress(address.to_string()));
        }

        let mut matches = self
            .model
            .sensors()
            .iter()
            .filter(|sensor| sensor.address == address);

        match (matches.next(), matches.next()) {
            (Some(sensor), None) => Ok(Some(sensor.clone())),
            (None, _) => Err(ConnectError::NotFound(address.to_string())),
            (Some(_), Some(_)) => Err(ConnectError::Ambiguous {
                address: address.to_string(),
                count: 2 + matches.count(),
            }),
        }
    }
}
