//! Peripheral identification helpers.

use btleplug::platform::PeripheralId;

use eco2_types::BleAddress;

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Whether an address string reported by the Bluetooth stack names `address`.
///
/// Comparison ignores case and `:`/`-` separators. The all-zero address that
/// macOS reports for every peripheral never matches.
pub fn address_matches(reported: &str, address: &BleAddress) -> bool {
    match reported.parse::<BleAddress>() {
        Ok(parsed) => parsed != BleAddress::new([0; 6]) && parsed == *address,
        Err(_) => false,
    }
}
