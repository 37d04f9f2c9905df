//! List the serial ports visible to the native handle layer.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example list_ports
//! cargo run --example list_ports -- --json
//! ```

use serial_bindings::{NativeBinding, PortType};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json = std::env::args().any(|arg| arg == "--json");
    let ports = NativeBinding::list()?.await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports detected");
        return Ok(());
    }

    println!("Found {} serial port(s):", ports.len());
    println!("{:-<70}", "");
    for port in &ports {
        let kind = match port.port_type {
            PortType::Usb => "usb",
            PortType::Pci => "pci",
            PortType::Bluetooth => "bluetooth",
            PortType::Unknown => "unknown",
        };
        println!("{:<24} {:<10}", port.path, kind);
        if let (Some(vid), Some(pid)) = (port.vendor_id, port.product_id) {
            println!("    VID:PID      {vid:04X}:{pid:04X}");
        }
        if let Some(ref manufacturer) = port.manufacturer {
            println!("    Manufacturer {manufacturer}");
        }
        if let Some(ref serial) = port.serial_number {
            println!("    Serial#      {serial}");
        }
    }
    Ok(())
}
