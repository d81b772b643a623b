use std::path::Path;

use btleplug::api::BDAddr;
use uuid::Uuid;


/// Checks the syntax of a sensor address.
///
/// Linux and Windows identify peripherals by their 48-bit MAC (`AA:BB:CC:DD:EE:FF`,
/// `-` is accepted as delimiter too). CoreBluetooth hides the MAC and hands out a
/// per-host UUID instead, so that form is accepted as well.
pub fn valid_address(address: &str) -> bool {
    let address = address.trim();
    if address.len() == 17 {
        let normalized = address.replace('-', ":");
        return BDAddr::from_str_delim(&normalized).is_ok();
    }

    address.len() == 36 && Uuid::parse_str(address).is_ok()
}

/// A path is usable for writing if it names a file whose directory already exists.
pub fn valid_path(path: &str) -> bool {
    let path = Path::new(path.trim());
    if path.as_os_str().is_empty() || path.is_dir() || path.file_name().is_none() {
        return false;
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
        _ => true,
    }
}
