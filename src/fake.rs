//! Stand-ins for the BLE scanner and client, used with `--demo`.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::SensorHandle;
use crate::sensor::scan_exclusively;
use crate::signal::{ClientCommand, ScannerCommand, SensorSignal};
use crate::status::Status;


const FAKE_SCAN_DURATION: Duration = Duration::from_millis(500);

pub fn fake_sensors() -> Vec<SensorHandle> {
    vec![
        SensorHandle::new("Polar H10 DEMO0001", "A0:9E:1A:DE:00:01"),
        SensorHandle::new("Polar H9 DEMO0002", "A0:9E:1A:DE:00:02"),
    ]
}

pub async fn run_fake_scanner(mut commands: UnboundedReceiver<ScannerCommand>, tx: Sender<SensorSignal>) {
    while let Some(ScannerCommand::Scan) = commands.recv().await {
        let _ = tx
            .send(SensorSignal::Status(Status::info("Searching for sensors (demo).")))
            .await;
        let scan = tokio::time::sleep(FAKE_SCAN_DURATION);
        scan_exclusively(&mut commands, &tx, scan).await;

        let sensors = fake_sensors();
        let status = Status::info(format!("Found {} sensor(s).", sensors.len()));
        let _ = tx.send(SensorSignal::SensorsDiscovered(sensors)).await;
        let _ = tx.send(SensorSignal::Status(status)).await;
    }
}

/// Emits random inter-beat intervals, paced like a resting heart.
pub async fn transmit_fake_ibis(tx: Sender<SensorSignal>, cancel: CancellationToken) {
    loop {
        let ibi = rand::thread_rng().gen_range(800..1000);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(u64::from(ibi))) => {
                if tx.send(SensorSignal::Ibis(vec![ibi])).await.is_err() {
                    break;
                }
            }
        }
    }
}

pub async fn run_fake_client(mut commands: UnboundedReceiver<ClientCommand>, tx: Sender<SensorSignal>) {
    let mut streaming: Option<(SensorHandle, CancellationToken, JoinHandle<()>)> = None;

    while let Some(command) = commands.recv().await {
        let status = match command {
            ClientCommand::Connect(sensor) => match &streaming {
                Some((current, _, _)) => Status::warning(format!(
                    "Currently connected to sensor at {}. Please disconnect before (re-)connecting.",
                    current.address
                )),
                None => {
                    let cancel = CancellationToken::new();
                    let task = tokio::spawn(transmit_fake_ibis(tx.clone(), cancel.clone()));
                    let status = Status::info(format!("Connected to sensor at {}.", sensor.address));
                    streaming = Some((sensor, cancel, task));
                    status
                }
            },
            ClientCommand::Disconnect => match streaming.take() {
                Some((sensor, cancel, task)) => {
                    cancel.cancel();
                    let _ = task.await;
                    Status::info(format!("Disconnected from sensor at {}.", sensor.address))
                }
                None => Status::info("No sensor connected."),
            },
        };
        let _ = tx.send(SensorSignal::Status(status)).await;
    }
    debug!("fake client stopped");
}


#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{channel, unbounded_channel};

    use super::*;

    #[tokio::test]
    async fn scan_reports_demo_sensors() {
        let (cmd_tx, cmd_rx) = unbounded_channel();
        let (tx, mut rx) = channel(16);
        tokio::spawn(run_fake_scanner(cmd_rx, tx));

        cmd_tx.send(ScannerCommand::Scan).unwrap();

        assert!(matches!(rx.recv().await, Some(SensorSignal::Status(_))));
        assert_eq!(rx.recv().await, Some(SensorSignal::SensorsDiscovered(fake_sensors())));
        assert_eq!(
            rx.recv().await,
            Some(SensorSignal::Status(Status::info("Found 2 sensor(s).")))
        );
    }

    #[tokio::test]
    async fn second_scan_during_scan_is_not_queued() {
        let (cmd_tx, cmd_rx) = unbounded_channel();
        let (tx, mut rx) = channel(16);
        cmd_tx.send(ScannerCommand::Scan).unwrap();
        cmd_tx.send(ScannerCommand::Scan).unwrap();
        drop(cmd_tx);

        run_fake_scanner(cmd_rx, tx).await;

        let mut busy = 0;
        let mut discovered = 0;
        while let Some(signal) = rx.recv().await {
            match signal {
                SensorSignal::Status(status) if status.text == "Already searching for sensors." => busy += 1,
                SensorSignal::SensorsDiscovered(_) => discovered += 1,
                _ => {}
            }
        }
        assert_eq!(busy, 1);
        assert_eq!(discovered, 1);
    }

    #[tokio::test]
    async fn connect_streams_until_disconnect() {
        let (cmd_tx, cmd_rx) = unbounded_channel();
        let (tx, mut rx) = channel(16);
        let client = tokio::spawn(run_fake_client(cmd_rx, tx));
        let sensor = fake_sensors().remove(0);

        cmd_tx.send(ClientCommand::Connect(sensor.clone())).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SensorSignal::Status(Status::info("Connected to sensor at A0:9E:1A:DE:00:01.")))
        );

        match rx.recv().await {
            Some(SensorSignal::Ibis(ibis)) => {
                assert_eq!(ibis.len(), 1);
                assert!((800..1000).contains(&ibis[0]));
            }
            other => panic!("expected intervals, got {other:?}"),
        }

        cmd_tx.send(ClientCommand::Connect(sensor)).unwrap();
        cmd_tx.send(ClientCommand::Disconnect).unwrap();
        cmd_tx.send(ClientCommand::Disconnect).unwrap();
        drop(cmd_tx);
        client.await.unwrap();

        let mut statuses = vec![];
        while let Some(signal) = rx.recv().await {
            if let SensorSignal::Status(status) = signal {
                statuses.push(status.text);
            }
        }
        assert_eq!(
            statuses,
            vec![
                "Currently connected to sensor at A0:9E:1A:DE:00:01. Please disconnect before (re-)connecting.",
                "Disconnected from sensor at A0:9E:1A:DE:00:01.",
                "No sensor connected.",
            ]
        );
    }
}
