//! Device discovery
//!
//! A stateless scan: every matching device is opened just long enough to read
//! its EEPROM strings, then closed again. Unrelated to any open session.

use crate::domain::{DeviceDescriptor, DeviceNode, DriverResult, TransportError, TransportResult};
use crate::ports::FtdiDriver;

/// List the devices with the given vendor/product ids.
///
/// Devices that cannot be opened (typically because another process, or
/// this one, already holds them) or whose EEPROM cannot be read are skipped
/// with a warning rather than failing the whole scan.
pub fn available_ports(
    driver: &dyn FtdiDriver,
    vendor_id: u16,
    product_id: u16,
) -> TransportResult<Vec<DeviceDescriptor>> {
    let nodes = driver.enumerate().map_err(TransportError::Enumeration)?;

    let mut found = Vec::new();
    for node in nodes.iter().filter(|n| n.matches(vendor_id, product_id)) {
        match describe(driver, node) {
            Ok(descriptor) => found.push(descriptor),
            Err(e) => log::warn!("Skipping device #{} at {}: {e}", node.index, node.location),
        }
    }

    log::debug!(
        "Found {} device(s) matching {vendor_id:04X}:{product_id:04X}",
        found.len()
    );
    Ok(found)
}

fn describe(driver: &dyn FtdiDriver, node: &DeviceNode) -> DriverResult<DeviceDescriptor> {
    let mut device = driver.open(node.index)?;
    let eeprom = device.read_eeprom();
    if let Err(e) = device.close() {
        log::debug!("Close after EEPROM read failed: {e}");
    }
    let eeprom = eeprom?;

    Ok(DeviceDescriptor {
        description: eeprom.description,
        manufacturer: eeprom.manufacturer,
        serial_number: eeprom.serial_number.to_uppercase(),
        vendor_id: eeprom.vendor_id,
        product_id: eeprom.product_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_ftdi::{MockDeviceSpec, MockFtdiDriver, MockOp};
    use crate::domain::{DriverError, FTDI_PID, FTDI_VID};

    #[test]
    fn lists_only_matching_devices() {
        let driver = MockFtdiDriver::new();
        driver.add_device(MockDeviceSpec::ft232r("first"));
        driver.add_device(MockDeviceSpec::ft232r("ft231x").with_ids(0x0403, 0x6015));
        driver.add_device(MockDeviceSpec::ft232r("second").with_description("Bench UART"));

        let ports = available_ports(&driver, FTDI_VID, FTDI_PID).unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].serial_number, "FIRST");
        assert_eq!(ports[1].description, "Bench UART");
        assert_eq!(ports[1].manufacturer, "FTDI");
    }

    #[test]
    fn scanned_devices_are_closed_again() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));

        available_ports(&driver, FTDI_VID, FTDI_PID).unwrap();

        assert!(!device.is_open());
        assert_eq!(device.count(MockOp::Close), 1);
    }

    #[test]
    fn unreadable_devices_are_skipped() {
        let driver = MockFtdiDriver::new();
        let bad = driver.add_device(MockDeviceSpec::ft232r("bad"));
        driver.add_device(MockDeviceSpec::ft232r("good"));
        bad.fail_next(MockOp::ReadEeprom, DriverError::EepromReadFailed);

        let ports = available_ports(&driver, FTDI_VID, FTDI_PID).unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].serial_number, "GOOD");
        assert!(!bad.is_open());
    }

    #[test]
    fn busy_devices_are_skipped() {
        let driver = MockFtdiDriver::new();
        driver.add_device(MockDeviceSpec::ft232r("busy"));
        let _held = driver.open(0).unwrap();

        assert!(available_ports(&driver, FTDI_VID, FTDI_PID).unwrap().is_empty());
    }

    #[test]
    fn enumeration_failure_is_reported() {
        let driver = MockFtdiDriver::new();
        driver.fail_next_enumeration(DriverError::Other("bus reset".into()));

        assert!(matches!(
            available_ports(&driver, FTDI_VID, FTDI_PID),
            Err(TransportError::Enumeration(_))
        ));
    }
}
