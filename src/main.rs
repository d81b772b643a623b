use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use eframe::egui;
use tokio::{spawn, sync::mpsc::Receiver as TokioReceiver};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod address;
mod config;
mod error;
mod fake;
mod model;
mod sensor;
mod signal;
mod status;
mod widget;
mod window;

use config::Config;
use model::Model;
use sensor::{ClientHandle, ScannerHandle, SensorClient, SensorScanner, SharedAdapter};
use signal::SensorSignal;
use window::{MainWindow, TracingConsole, WINDOW_POSITION, WINDOW_SIZE, WINDOW_TITLE};

const REPAINT_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);


fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let result = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init()
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    result.map_err(|err| anyhow!("{err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    config.validate()?;
    init_logging(&config)?;

    let (tx, rx) = tokio::sync::mpsc::channel(128);
    let (scanner, scanner_rx) = sensor::scanner_channel();
    let (client, client_rx) = sensor::client_channel();

    let client_task = if config.demo {
        info!("using simulated sensors");
        spawn(fake::run_fake_scanner(scanner_rx, tx.clone()));
        spawn(fake::run_fake_client(client_rx, tx))
    } else {
        // Client lookups only see peripherals the scanning adapter found.
        let adapter = SharedAdapter::new();
        spawn(SensorScanner::new(scanner_rx, tx.clone(), config.scan_duration(), adapter.clone()).run());
        spawn(SensorClient::new(client_rx, tx, adapter).run())
    };

    let window = MainWindow::new(Model::new(config.ibi_buffer_size), scanner, client, TracingConsole);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(WINDOW_TITLE)
            .with_position(WINDOW_POSITION)
            .with_inner_size(WINDOW_SIZE),
        ..Default::default()
    };
    let result = eframe::run_native(
        "hrconnect",
        native_options,
        Box::new(|cc| Ok(Box::new(SensorApp::new(cc, window, rx)))),
    );

    // The window dropped its handles, so the client task disconnects and exits.
    if tokio::time::timeout(SHUTDOWN_GRACE, client_task).await.is_err() {
        warn!("sensor did not disconnect in time");
    }

    result.map_err(|err| anyhow!("{err}"))
}


struct SensorApp {
    window: MainWindow<ScannerHandle, ClientHandle, TracingConsole>,
    rx_from_sensors: TokioReceiver<SensorSignal>,
}

impl SensorApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        window: MainWindow<ScannerHandle, ClientHandle, TracingConsole>,
        rx_from_sensors: TokioReceiver<SensorSignal>,
    ) -> Self {
        SensorApp {
            window,
            rx_from_sensors,
        }
    }

    fn read_channel(&mut self) {
        while let Ok(signal) = self.rx_from_sensors.try_recv() {
            self.window.handle_signal(signal);
        }
    }

    fn address_menu(&mut self, ui: &mut egui::Ui) {
        let menu = self.window.address_menu();
        let mut selected = menu.selected();

        egui::ComboBox::from_id_salt("address_menu")
            .width(ui.available_width())
            .selected_text(menu.current_text().unwrap_or_default().to_owned())
            .show_ui(ui, |ui| {
                for (index, entry) in menu.entries().iter().enumerate() {
                    ui.selectable_value(&mut selected, Some(index), entry.as_str());
                }
            });

        if let Some(index) = selected {
            self.window.address_menu_mut().select(index);
        }
    }
}

impl eframe::App for SensorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.read_channel();

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.add(widget::get_status_label(self.window.status()));
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered_justified(|ui| {
                if ui.add(widget::get_control_button("Scan")).clicked() {
                    self.window.on_scan_clicked();
                }

                self.address_menu(ui);

                if ui.add(widget::get_control_button("Connect")).clicked() {
                    self.window.on_connect_clicked();
                }
                if ui.add(widget::get_control_button("Disconnect")).clicked() {
                    self.window.on_disconnect_clicked();
                }

                ui.add_space(16.0);
                ui.add(widget::get_heart_rate_label(self.window.model().heart_rate()));
                if let Some(ibi) = self.window.model().ibis().last() {
                    ui.label(format!("IBI: {ibi} ms"));
                }
            });
        });

        // Sensor signals arrive without user input.
        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}
