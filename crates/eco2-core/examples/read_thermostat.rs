//! Example: Reading a Thermostat
//!
//! Connects to an eco2 thermostat, prints its name, temperatures and
//! battery level, then disconnects.
//!
//! Run with: `cargo run --example read_thermostat -- <ADDRESS> <KEY_HEX> [PIN]`
//!
//! Without a key, press the thermostat's button and run with `--fetch-key`
//! to read it from the device:
//! `cargo run --example read_thermostat -- <ADDRESS> --fetch-key`

use std::env;

use eco2_core::{BleTransport, Session, SessionConfig};
use eco2_types::EncryptionKey;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <ADDRESS> <KEY_HEX|--fetch-key> [PIN]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} A1:B2:C3:D4:E5:F6 00112233445566778899aabbccddeeff 1234", args[0]);
        std::process::exit(1);
    }

    let config = SessionConfig::default();
    let mut session = Session::with_config(&args[1], BleTransport::new(config.clone()), config)?;
    if let Some(pin) = args.get(3) {
        session.set_pin(pin.parse()?)?;
    }

    if args[2] == "--fetch-key" {
        println!("Connecting to {}...", session.address());
        // The PIN step needs the key; only the link matters here.
        let _ = session.connect_with_key(&[0; 16]).await;
        let key = session.retrieve_key().await;
        session.disconnect().await?;

        let key = key?;
        println!("Device key: {}", key.to_hex());
        return Ok(());
    }

    let key = EncryptionKey::from_hex(&args[2])?;

    println!("Connecting to {}...", session.address());
    let result = session.connect_with_key(key.as_bytes()).await;
    println!("{}", session.describe());

    if result.is_ok() {
        println!();
        println!("Current Readings:");
        println!("  Name:        {}", session.name());
        println!("  Temperature: {:.1} °C", session.temperature());
        println!("  Set point:   {:.1} °C", session.set_point_temperature());
        println!("  Battery:     {}%", session.battery_level());
    }

    session.disconnect().await?;
    result?;
    Ok(())
}
