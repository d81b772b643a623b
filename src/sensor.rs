use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::{
    unbounded_channel, Sender as TokioSender, UnboundedReceiver, UnboundedSender,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use uuid::Uuid;
use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};

use crate::error::SensorError;
use crate::model::SensorHandle;
use crate::signal::{ClientCommand, ScannerCommand, SensorSignal};
use crate::status::Status;
use crate::window::{ClientPort, ScanPort};


pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d00001000800000805f9b34fb);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a3700001000800000805f9b34fb);

pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);


/// UI side of the scanner task.
#[derive(Clone)]
pub struct ScannerHandle {
    tx: UnboundedSender<ScannerCommand>,
}

impl ScanPort for ScannerHandle {
    fn scan(&self) {
        if self.tx.send(ScannerCommand::Scan).is_err() {
            warn!("scanner task is gone, scan request dropped");
        }
    }
}

pub fn scanner_channel() -> (ScannerHandle, UnboundedReceiver<ScannerCommand>) {
    let (tx, rx) = unbounded_channel();
    (ScannerHandle { tx }, rx)
}

/// UI side of the client task.
#[derive(Clone)]
pub struct ClientHandle {
    tx: UnboundedSender<ClientCommand>,
}

impl ClientPort for ClientHandle {
    fn connect(&self, sensor: SensorHandle) {
        if self.tx.send(ClientCommand::Connect(sensor)).is_err() {
            warn!("client task is gone, connect request dropped");
        }
    }

    fn disconnect(&self) {
        if self.tx.send(ClientCommand::Disconnect).is_err() {
            warn!("client task is gone, disconnect request dropped");
        }
    }
}

pub fn client_channel() -> (ClientHandle, UnboundedReceiver<ClientCommand>) {
    let (tx, rx) = unbounded_channel();
    (ClientHandle { tx }, rx)
}

/// A decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub heart_rate: u16,
    /// RR intervals in milliseconds.
    pub ibis: Vec<u16>,
}

/// Decodes a Heart Rate Measurement (0x2A37) value.
///
/// Byte 0 holds the flags: bit 0 selects a u16 heart rate, bit 3 announces two bytes of
/// energy expended, bit 4 announces trailing RR intervals. RR intervals are little endian
/// u16 in units of 1/1024 s.
pub fn decode_heart_rate_measurement(data: &[u8]) -> Option<HeartRateMeasurement> {
    let (&flags, rest) = data.split_first()?;

    let (heart_rate, mut rest) = if flags & 0x01 == 0 {
        let (&hr, rest) = rest.split_first()?;
        (u16::from(hr), rest)
    } else {
        let hr = rest.get(..2)?;
        (u16::from_le_bytes([hr[0], hr[1]]), &rest[2..])
    };

    if flags & 0x08 != 0 {
        rest = rest.get(2..)?;
    }

    let mut ibis = vec![];
    if flags & 0x10 != 0 {
        for rr in rest.chunks_exact(2) {
            let rr = u32::from(u16::from_le_bytes([rr[0], rr[1]]));
            ibis.push(((rr * 1000 + 512) / 1024) as u16);
        }
    }

    Some(HeartRateMeasurement { heart_rate, ibis })
}

/// The address a peripheral is listed under.
///
/// CoreBluetooth does not expose MACs, so macOS falls back to the peripheral id.
pub fn sensor_address(peripheral: &PlatformPeripheral) -> String {
    #[cfg(target_os = "macos")]
    {
        peripheral.id().to_string()
    }
    #[cfg(not(target_os = "macos"))]
    {
        peripheral.address().to_string()
    }
}

async fn first_adapter() -> Result<Adapter, SensorError> {
    let manager = Manager::new().await?;
    let adapter_list = manager.adapters().await?;

    for adapter in adapter_list.iter() {
        let name = adapter
            .adapter_info()
            .await
            .unwrap_or("No name adapter".to_string());
        debug!(adapter = %name, "found Bluetooth adapter");
    }

    // TODO: let the user pick an adapter when there is more than one
    adapter_list.into_iter().next().ok_or(SensorError::AdapterNotFound)
}

/// The adapter used by both the scanner and the client.
///
/// WinRT and CoreBluetooth only list peripherals that the same adapter has scanned, so the
/// client must look sensors up on the scanner's adapter. Resolved on first use.
pub struct SharedAdapter<A = Adapter> {
    slot: Arc<Mutex<Option<A>>>,
}

impl<A> Clone for SharedAdapter<A> {
    fn clone(&self) -> Self {
        SharedAdapter { slot: self.slot.clone() }
    }
}

impl<A: Clone> Default for SharedAdapter<A> {
    fn default() -> Self {
        SharedAdapter::new()
    }
}

impl<A: Clone> SharedAdapter<A> {
    pub fn new() -> Self {
        SharedAdapter { slot: Arc::new(Mutex::new(None)) }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<A, SensorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<A, SensorError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }
        let adapter = init().await?;
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    /// Forgets the adapter so the next use looks it up again.
    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }
}

impl SharedAdapter {
    pub async fn get(&self) -> Result<Adapter, SensorError> {
        self.get_or_init(first_adapter).await
    }
}

/// Runs `scan` while answering every Scan that arrives meanwhile instead of queueing it.
pub async fn scan_exclusively<F: Future>(
    commands: &mut UnboundedReceiver<ScannerCommand>,
    tx_to_gui: &TokioSender<SensorSignal>,
    scan: F,
) -> F::Output {
    tokio::pin!(scan);
    loop {
        tokio::select! {
            result = &mut scan => return result,
            Some(ScannerCommand::Scan) = commands.recv() => {
                let _ = tx_to_gui
                    .send(SensorSignal::Status(Status::info("Already searching for sensors.")))
                    .await;
            }
        }
    }
}

/// Disconnects again when setting up a fresh connection failed half way.
async fn disconnect_on_error<T, D, DFut>(result: Result<T, SensorError>, disconnect: D) -> Result<T, SensorError>
where
    D: FnOnce() -> DFut,
    DFut: Future<Output = btleplug::Result<()>>,
{
    if result.is_err() {
        if let Err(err) = disconnect().await {
            warn!(error = %err, "disconnecting after failed setup failed");
        }
    }
    result
}

async fn discover(adapter: Adapter, scan_duration: Duration) -> Result<Vec<SensorHandle>, SensorError> {
    adapter
        .start_scan(ScanFilter { services: vec![HEART_RATE_SERVICE_UUID] })
        .await?;
    tokio::time::sleep(scan_duration).await;
    adapter.stop_scan().await?;

    // The filter is not honored on every platform, so check the advertised services too.
    let mut sensors = vec![];
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(properties)) = peripheral.properties().await else { continue; };
        let Some(name) = properties.local_name else { continue; };
        if !properties.services.contains(&HEART_RATE_SERVICE_UUID) {
            continue;
        }
        sensors.push(SensorHandle::new(name, sensor_address(&peripheral)));
    }

    Ok(sensors)
}


pub struct SensorScanner {
    commands: UnboundedReceiver<ScannerCommand>,
    tx_to_gui: TokioSender<SensorSignal>,
    scan_duration: Duration,
    adapter: SharedAdapter,
}

impl SensorScanner {
    pub fn new(
        commands: UnboundedReceiver<ScannerCommand>,
        tx_to_gui: TokioSender<SensorSignal>,
        scan_duration: Duration,
        adapter: SharedAdapter,
    ) -> Self {
        SensorScanner {
            commands,
            tx_to_gui,
            scan_duration,
            adapter,
        }
    }

    async fn send(&self, signal: SensorSignal) {
        let _ = self.tx_to_gui.send(signal).await;
    }

    pub async fn run(mut self) {
        while let Some(ScannerCommand::Scan) = self.commands.recv().await {
            let adapter = match self.adapter.get().await {
                Ok(adapter) => adapter,
                Err(err) => {
                    self.send(SensorSignal::Status(Status::error(err.to_string()))).await;
                    continue;
                }
            };

            self.send(SensorSignal::Status(Status::info(
                "Searching for sensors (this takes a few seconds).",
            )))
            .await;

            let scan = discover(adapter, self.scan_duration);
            let result = scan_exclusively(&mut self.commands, &self.tx_to_gui, scan).await;

            match result {
                Ok(sensors) if sensors.is_empty() => {
                    self.send(SensorSignal::SensorsDiscovered(sensors)).await;
                    self.send(SensorSignal::Status(Status::warning("Couldn't find sensors."))).await;
                }
                Ok(sensors) => {
                    info!(count = sensors.len(), "scan finished");
                    let status = Status::info(format!("Found {} sensor(s).", sensors.len()));
                    self.send(SensorSignal::SensorsDiscovered(sensors)).await;
                    self.send(SensorSignal::Status(status)).await;
                }
                Err(err) => {
                    // The adapter may have gone away; look it up again next time.
                    self.adapter.reset().await;
                    self.send(SensorSignal::Status(Status::error(err.to_string()))).await;
                }
            }
        }
        debug!("scanner task stopped");
    }
}


struct Connection {
    sensor: SensorHandle,
    peripheral: PlatformPeripheral,
    cancel: CancellationToken,
    stream: JoinHandle<()>,
}

pub struct SensorClient {
    commands: UnboundedReceiver<ClientCommand>,
    tx_to_gui: TokioSender<SensorSignal>,
    adapter: SharedAdapter,
    connection: Option<Connection>,
}

impl SensorClient {
    pub fn new(
        commands: UnboundedReceiver<ClientCommand>,
        tx_to_gui: TokioSender<SensorSignal>,
        adapter: SharedAdapter,
    ) -> Self {
        SensorClient {
            commands,
            tx_to_gui,
            adapter,
            connection: None,
        }
    }

    async fn status(&self, status: Status) {
        let _ = self.tx_to_gui.send(SensorSignal::Status(status)).await;
    }

    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                ClientCommand::Connect(sensor) => self.connect(sensor).await,
                ClientCommand::Disconnect => self.disconnect().await,
            }
        }

        // The window is gone, don't leave the sensor connected.
        self.disconnect().await;
        debug!("client task stopped");
    }

    async fn connect(&mut self, sensor: SensorHandle) {
        if self.connection.as_ref().is_some_and(|conn| conn.stream.is_finished()) {
            self.connection = None;
        }

        if let Some(conn) = &self.connection {
            self.status(Status::warning(format!(
                "Currently connected to sensor at {}. Please disconnect before (re-)connecting.",
                conn.sensor.address
            )))
            .await;
            return;
        }

        self.status(Status::info(format!("Connecting to sensor at {} ({}).", sensor.address, sensor.name)))
            .await;

        match self.open(&sensor).await {
            Ok(conn) => {
                self.status(Status::info(format!("Connected to sensor at {}.", sensor.address))).await;
                self.connection = Some(conn);
            }
            Err(err) => {
                warn!(address = %sensor.address, error = %err, "connecting failed");
                self.status(Status::error(err.to_string())).await;
            }
        }
    }

    async fn open(&self, sensor: &SensorHandle) -> Result<Connection, SensorError> {
        let adapter = self.adapter.get().await?;

        // The adapter keeps what it saw during the last scan; entries may be stale.
        let peripheral = adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| sensor_address(p) == sensor.address)
            .ok_or_else(|| SensorError::PeripheralNotFound(sensor.address.clone()))?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        let subscribed = async {
            peripheral.discover_services().await?;

            let characteristic = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID && c.properties.contains(CharPropFlags::NOTIFY))
                .ok_or_else(|| SensorError::HrCharNotFound(sensor.address.clone()))?;

            debug!(uuid = %characteristic.uuid, "subscribing to characteristic");
            peripheral.subscribe(&characteristic).await?;
            Ok::<_, SensorError>(peripheral.notifications().await?)
        }
        .await;
        let notifications = disconnect_on_error(subscribed, || peripheral.disconnect()).await?;

        let cancel = CancellationToken::new();
        let stream = tokio::spawn(stream_ibis(
            notifications,
            sensor.address.clone(),
            self.tx_to_gui.clone(),
            cancel.clone(),
        ));

        Ok(Connection {
            sensor: sensor.clone(),
            peripheral,
            cancel,
            stream,
        })
    }

    async fn disconnect(&mut self) {
        let Some(conn) = self.connection.take() else {
            self.status(Status::info("No sensor connected.")).await;
            return;
        };

        conn.cancel.cancel();
        let _ = conn.stream.await;
        if let Err(err) = conn.peripheral.disconnect().await {
            warn!(address = %conn.sensor.address, error = %err, "disconnecting failed");
        }
        self.status(Status::info(format!("Disconnected from sensor at {}.", conn.sensor.address))).await;
    }
}

/// Forwards RR intervals until cancelled or until the sensor stops notifying.
async fn stream_ibis<S>(
    mut notifications: S,
    address: String,
    tx_to_gui: TokioSender<SensorSignal>,
    cancel: CancellationToken,
) where
    S: futures::Stream<Item = btleplug::api::ValueNotification> + Unpin,
{
    let mut receiving = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            notification = notifications.next() => {
                let Some(notification) = notification else {
                    let _ = tx_to_gui
                        .send(SensorSignal::Status(Status::error(format!("Lost connection to sensor at {address}."))))
                        .await;
                    break;
                };
                if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
                    continue;
                }
                let Some(measurement) = decode_heart_rate_measurement(&notification.value) else {
                    debug!(len = notification.value.len(), "malformed heart rate measurement");
                    continue;
                };
                trace!(heart_rate = measurement.heart_rate, ibis = ?measurement.ibis, "measurement");
                if measurement.ibis.is_empty() {
                    continue;
                }
                if !receiving {
                    receiving = true;
                    let _ = tx_to_gui
                        .send(SensorSignal::Status(Status::info(format!("Receiving data from {address}.")).quiet()))
                        .await;
                }
                let _ = tx_to_gui.send(SensorSignal::Ibis(measurement.ibis)).await;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_u8_heart_rate_without_intervals() {
        let measurement = decode_heart_rate_measurement(&[0x00, 72]).unwrap();
        assert_eq!(measurement, HeartRateMeasurement { heart_rate: 72, ibis: vec![] });
    }

    #[test]
    fn decodes_rr_intervals_in_milliseconds() {
        // 1024/1024 s and 819/1024 s
        let data = [0x10, 60, 0x00, 0x04, 0x33, 0x03];
        let measurement = decode_heart_rate_measurement(&data).unwrap();
        assert_eq!(measurement.heart_rate, 60);
        assert_eq!(measurement.ibis, vec![1000, 800]);
    }

    #[test]
    fn skips_u16_heart_rate_and_energy_expended() {
        let data = [0x19, 0x2c, 0x01, 0xff, 0xff, 0x00, 0x02];
        let measurement = decode_heart_rate_measurement(&data).unwrap();
        assert_eq!(measurement.heart_rate, 300);
        assert_eq!(measurement.ibis, vec![500]);
    }

    #[test]
    fn rejects_truncated_values() {
        assert_eq!(decode_heart_rate_measurement(&[]), None);
        assert_eq!(decode_heart_rate_measurement(&[0x00]), None);
        assert_eq!(decode_heart_rate_measurement(&[0x01, 0x2c]), None);
        assert_eq!(decode_heart_rate_measurement(&[0x08, 60, 0x01]), None);
    }

    #[test]
    fn handles_forward_commands() {
        let (scanner, mut scanner_rx) = scanner_channel();
        let (client, mut client_rx) = client_channel();
        let sensor = SensorHandle::new("Polar H10", "A0:9E:1A:00:00:11");

        scanner.scan();
        client.connect(sensor.clone());
        client.disconnect();

        assert_eq!(scanner_rx.try_recv().unwrap(), ScannerCommand::Scan);
        assert_eq!(client_rx.try_recv().unwrap(), ClientCommand::Connect(sensor));
        assert_eq!(client_rx.try_recv().unwrap(), ClientCommand::Disconnect);
    }

    #[tokio::test]
    async fn shared_adapter_resolves_once_for_all_clones() {
        let scanner_side: SharedAdapter<u32> = SharedAdapter::new();
        let client_side = scanner_side.clone();

        assert_eq!(scanner_side.get_or_init(|| async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(client_side.get_or_init(|| async { Ok(2) }).await.unwrap(), 1);

        scanner_side.reset().await;
        assert_eq!(client_side.get_or_init(|| async { Ok(3) }).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn shared_adapter_keeps_trying_after_failure() {
        let adapter: SharedAdapter<u32> = SharedAdapter::new();

        let err = adapter
            .get_or_init(|| async { Err(SensorError::AdapterNotFound) })
            .await;
        assert!(matches!(err, Err(SensorError::AdapterNotFound)));
        assert_eq!(adapter.get_or_init(|| async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn failed_setup_disconnects_once() {
        let calls = std::cell::Cell::new(0);
        let disconnect = || {
            calls.set(calls.get() + 1);
            async { Ok(()) }
        };

        let result: Result<(), _> =
            disconnect_on_error(Err(SensorError::HrCharNotFound("A0:9E:1A:00:00:11".into())), disconnect).await;

        assert!(matches!(result, Err(SensorError::HrCharNotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn successful_setup_stays_connected() {
        let calls = std::cell::Cell::new(0);
        let disconnect = || {
            calls.set(calls.get() + 1);
            async { Ok(()) }
        };

        let result = disconnect_on_error(Ok(5), disconnect).await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn scan_requests_during_a_scan_are_answered_not_queued() {
        let (scanner, mut commands) = scanner_channel();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        scanner.scan();
        scanner.scan();

        let rx_ref = &mut rx;
        let (found, ()) = tokio::join!(
            scan_exclusively(&mut commands, &tx, async move {
                let _ = done_rx.await;
                2
            }),
            async move {
                assert_eq!(
                    rx_ref.recv().await,
                    Some(SensorSignal::Status(Status::info("Already searching for sensors.")))
                );
                assert_eq!(
                    rx_ref.recv().await,
                    Some(SensorSignal::Status(Status::info("Already searching for sensors.")))
                );
                done_tx.send(()).unwrap();
            },
        );

        assert_eq!(found, 2);
        assert!(commands.try_recv().is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handles_survive_a_stopped_task() {
        let (scanner, scanner_rx) = scanner_channel();
        drop(scanner_rx);
        scanner.scan();
    }
}
