//! General utilities shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen
/// in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Formats a 6-byte MAC address as the lowercase colon-hex player id used
/// throughout the registry (`aa:bb:cc:dd:ee:ff`).
#[must_use]
pub fn mac_to_player_id(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero_after_epoch() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn mac_to_player_id_formats_lowercase_colon_hex() {
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        assert_eq!(mac_to_player_id(&mac), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn mac_to_player_id_pads_single_digit_bytes() {
        let mac = [0x00, 0x01, 0x0a, 0xff, 0x10, 0x02];
        assert_eq!(mac_to_player_id(&mac), "00:01:0a:ff:10:02");
    }
}
