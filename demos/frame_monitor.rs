use concept2::{Concept2Device, Result};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📡 Concept2 Frame Monitor Example");

    // Optional device index as the first argument
    let index = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let mut monitor = match Concept2Device::open_index(index) {
        Ok(device) => {
            info!("✅ Opened: {}", device.descriptor());
            device
        }
        Err(e) => {
            error!("❌ Failed to open monitor {}: {}", index, e);
            return Err(e);
        }
    };

    let bytes_seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&bytes_seen);
    monitor.on_data(move |payload| {
        counter.fetch_add(payload.len() as u64, Ordering::Relaxed);
    });

    monitor.on_frame(|frame| {
        println!("📦 frame {:02X?}", frame.as_bytes());
    });

    monitor.on_error(|e| warn!("⚠️  {}", e));

    info!("Listening for frames, press Ctrl+C to stop");

    tokio::select! {
        result = monitor.run() => {
            if let Err(e) = result {
                error!("❌ Monitor stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Interrupted");
        }
    }

    println!("\n📊 Session Summary:");
    println!("  Frames: {}", monitor.frame_count());
    println!("  Payload bytes: {}", bytes_seen.load(Ordering::Relaxed));

    monitor.close()?;
    info!("✅ Closed");
    Ok(())
}
