use concept2::{Concept2Device, Result};
use tracing::{error, info};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔍 Concept2 Device Listing Example");

    let devices = match Concept2Device::devices() {
        Ok(devices) => devices,
        Err(e) => {
            error!("❌ Failed to enumerate HID devices: {}", e);
            return Err(e);
        }
    };

    if devices.is_empty() {
        info!("No Concept2 monitors attached");
        return Ok(());
    }

    for (index, device) in devices.iter().enumerate() {
        println!("[{index}] {device}");
        if let Some(serial) = &device.serial_number {
            println!("    serial: {serial}");
        }
        if let Some(manufacturer) = &device.manufacturer {
            println!("    manufacturer: {manufacturer}");
        }
    }

    info!("✅ Found {} monitor(s)", devices.len());
    Ok(())
}
