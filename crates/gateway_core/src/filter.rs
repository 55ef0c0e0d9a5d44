//! Filtro de endereçamento dos frames LoRa.

use crate::types::{BROADCAST_ADDRESS, RadioFrame};

/// Decide se um frame é destinado a este gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFilter {
    self_address: u8,
}

impl FrameFilter {
    pub fn new(self_address: u8) -> Self {
        Self { self_address }
    }

    pub fn self_address(&self) -> u8 {
        self.self_address
    }

    /// Aceita o frame se o endereço for o deste gateway ou broadcast (`0xFF`).
    pub fn accept(&self, frame: &RadioFrame) -> bool {
        frame.sender_address == self.self_address || frame.sender_address == BROADCAST_ADDRESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_own_and_broadcast_addresses() {
        let filter = FrameFilter::new(0x01);
        for address in 0..=u8::MAX {
            let frame = RadioFrame::new(address, "Solo=1");
            let expected = address == 0x01 || address == BROADCAST_ADDRESS;
            assert_eq!(filter.accept(&frame), expected, "endereço 0x{address:02X}");
        }
    }

    #[test]
    fn broadcast_gateway_address_accepts_only_broadcast() {
        let filter = FrameFilter::new(BROADCAST_ADDRESS);
        assert!(filter.accept(&RadioFrame::new(0xFF, "")));
        assert!(!filter.accept(&RadioFrame::new(0x00, "")));
    }
}
