use std::env;
use std::net::IpAddr;
use std::time::Duration;

use gree_climate::{Discovery, Handshake, GENERIC_KEY};

/// Usage: scan [broadcast-address ...] [--bind]
#[tokio::main]
async fn main() -> gree_climate::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let bind = args.iter().any(|a| a == "--bind");
    let targets: Vec<IpAddr> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(|a| a.parse().expect("broadcast address must be an IP"))
        .collect();

    println!("Scanning for 5s...");
    let mut scan = Discovery::new().scan(&targets, Duration::from_secs(5)).await?;

    // bind right away, units only accept it shortly after answering a scan
    while let Some(device) = scan.next().await? {
        println!(
            "{device} | brand: {} | model: {} | version: {}",
            device.brand.as_deref().unwrap_or("-"),
            device.model.as_deref().unwrap_or("-"),
            device.version.as_deref().unwrap_or("-"),
        );
        if bind {
            match Handshake::new(device.clone(), GENERIC_KEY).run().await {
                Ok(key) => println!("  key: {}", String::from_utf8_lossy(key.key().as_bytes())),
                Err(e) => eprintln!("  bind failed: {e}"),
            }
        }
    }
    Ok(())
}
