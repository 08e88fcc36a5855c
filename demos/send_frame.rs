use concept2::{AdapterEvent, Concept2Device, EventKind, Frame, Result, WriteOptions};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📤 Concept2 Send Frame Example");

    let mut monitor = match Concept2Device::open() {
        Ok(device) => {
            info!("✅ Opened: {}", device.descriptor());
            device
        }
        Err(e) => {
            error!("❌ Failed to open monitor: {}", e);
            return Err(e);
        }
    };

    let mut frames = monitor.stream(EventKind::Frame);

    // Contents are taken verbatim from the command line as hex bytes
    let contents: Vec<u8> = std::env::args()
        .skip(1)
        .filter_map(|arg| u8::from_str_radix(arg.trim_start_matches("0x"), 16).ok())
        .collect();

    let frame = Frame::standard(&contents)?;
    info!("Sending {:02X?}", frame.as_bytes());
    monitor.write_with(&frame, WriteOptions::default())?;

    let reply = timeout(Duration::from_secs(2), async {
        loop {
            match monitor.process_next().await {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => warn!("⚠️  {}", e),
            }
            if monitor.frame_count() > 0 {
                return frames.next().await;
            }
        }
    })
    .await;

    match reply {
        Ok(Some(AdapterEvent::Frame(frame))) => {
            println!("📥 reply {:02X?}", frame.as_bytes());
            println!("   contents {:02X?}", frame.contents());
        }
        Ok(_) => warn!("Monitor stopped delivering reports"),
        Err(_) => warn!("⏱️  No reply within 2s"),
    }

    monitor.close()?;
    Ok(())
}
