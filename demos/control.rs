use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use gree_climate::{
    DISCOVERY_PORT, Device, DeviceDescriptor, PropertyId, PropertyValue, SessionKey, Temperature,
};

/// Usage: control <ip> <mac> <key> [on|off] [temp-celsius]
#[tokio::main]
async fn main() -> gree_climate::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let usage = "usage: control <ip> <mac> <key> [on|off] [temp-celsius]";
    let ip = args.get(1).expect(usage);
    let mac = args.get(2).expect(usage);
    let key = SessionKey::from_text(args.get(3).expect(usage))?;

    let addr = SocketAddr::new(ip.parse().expect("invalid IP"), DISCOVERY_PORT);
    let mut device = Device::builder(DeviceDescriptor::new(addr, mac.as_str()))
        .session_key(key)
        .timeout(Duration::from_secs(3))
        .connect()
        .await?;

    device.update_state().await?;
    print_state(&device);

    for arg in &args[4..] {
        let staged = match arg.as_str() {
            "on" => device.set_property(PropertyId::Power, PropertyValue::Switch(true)),
            "off" => device.set_property(PropertyId::Power, PropertyValue::Switch(false)),
            temp => {
                let celsius: i64 = temp.parse().expect("temperature must be a whole number");
                device.set_property(
                    PropertyId::TargetTemperature,
                    PropertyValue::Temperature(Temperature::celsius(celsius)),
                )
            }
        };
        staged?;
    }

    if !device.pending().is_empty() {
        device.commit().await?;
        println!("Committed.");
        print_state(&device);
    }
    Ok(())
}

fn print_state(device: &Device) {
    println!(
        "[{}] power: {:?} | mode: {:?} | target: {} | room: {} | fan: {:?} | firmware: {}",
        device.descriptor().name,
        device.power(),
        device.mode(),
        device.target_temperature().map_or("-".to_string(), |t| t.to_string()),
        device.current_temperature().map_or("-".to_string(), |t| t.to_string()),
        device.fan_speed(),
        device.firmware_version().unwrap_or("-"),
    );
}
