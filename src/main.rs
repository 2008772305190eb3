//! `ftserial` serial monitor
//!
//! ```text
//! ftserial --list [VID:PID]
//! ftserial [VID:PID] [BAUD] [ENCODING] [FLOW]
//! ```
//!
//! Opens the device through the OS serial driver and copies everything it
//! receives to stdout until the device goes away.
//! Set `RUST_LOG=ftserial_lib=debug` for transport logs.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ftserial_lib::adapters::serial_port::SerialPortDriver;
use ftserial_lib::domain::{FlowControl, LineEncoding, SerialConfig, TransportError, UsbId};
use ftserial_lib::transport::{available_ports, FtTransport, TransportEvent};

fn parse_usb_id(arg: &str) -> Result<UsbId, TransportError> {
    let invalid = || TransportError::Config(format!("Expected VID:PID in hex, got '{arg}'"));
    let (vid, pid) = arg.split_once(':').ok_or_else(invalid)?;
    Ok(UsbId {
        vendor_id: u16::from_str_radix(vid, 16).map_err(|_| invalid())?,
        product_id: u16::from_str_radix(pid, 16).map_err(|_| invalid())?,
    })
}

fn parse_config(args: &[String]) -> Result<(UsbId, SerialConfig), TransportError> {
    let mut config = SerialConfig::default();
    let port = match args.first() {
        Some(arg) => parse_usb_id(arg)?,
        None => UsbId::default(),
    };
    if let Some(baud) = args.get(1) {
        config.baud_rate = baud
            .parse()
            .map_err(|_| TransportError::Config(format!("Invalid baud rate '{baud}'")))?;
    }
    if let Some(encoding) = args.get(2) {
        config.line_encoding = encoding.parse::<LineEncoding>()?;
    }
    if let Some(flow) = args.get(3) {
        config.flow_control = flow.parse::<FlowControl>()?;
    }
    Ok((port, config))
}

fn list(args: &[String]) -> Result<(), TransportError> {
    let port = match args.first() {
        Some(arg) => parse_usb_id(arg)?,
        None => UsbId::default(),
    };
    let ports = available_ports(&SerialPortDriver, port.vendor_id, port.product_id)?;
    if ports.is_empty() {
        println!("No devices found for {:04X}:{:04X}", port.vendor_id, port.product_id);
    }
    for p in ports {
        println!(
            "{:04X}:{:04X}  {}  {}  {}",
            p.vendor_id, p.product_id, p.serial_number, p.manufacturer, p.description
        );
    }
    Ok(())
}

fn monitor(args: &[String]) -> Result<(), TransportError> {
    let (port, config) = parse_config(args)?;
    let transport = FtTransport::with_config(Arc::new(SerialPortDriver), port, config);
    let events = transport.subscribe();
    transport.open()?;

    let stdout = io::stdout();
    'monitor: while transport.is_open() {
        for event in events.try_iter() {
            if let TransportEvent::ErrorOccurred(flags) = event {
                log::error!(
                    "Transport error {flags:?}: {}",
                    transport.error_string().unwrap_or_default()
                );
                break 'monitor;
            }
        }
        if !transport.wait_for_ready_read(Duration::from_secs(1)) {
            continue;
        }
        let bytes = transport.read(4096);
        let mut out = stdout.lock();
        if out.write_all(&bytes).and_then(|()| out.flush()).is_err() {
            break;
        }
    }
    transport.close();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("--list") => list(&args[1..]),
        Some("--help") | Some("-h") => {
            println!("usage: ftserial --list [VID:PID]");
            println!("       ftserial [VID:PID] [BAUD] [ENCODING] [FLOW]");
            Ok(())
        }
        _ => monitor(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ftserial: {e}");
            ExitCode::FAILURE
        }
    }
}
