use core::fmt;

use super::constant::SD_SCR_BUS_WIDTH_4;

/// Physical layer version advertised by the SCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdVersion {
    #[default]
    Unknown,
    V1,
    V1_1,
    V2,
    V3,
    V4,
}

impl fmt::Display for SdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdVersion::Unknown => "unknown",
            SdVersion::V1 => "1.0 or 1.01",
            SdVersion::V1_1 => "1.10",
            SdVersion::V2 => "2.00",
            SdVersion::V3 => "3.0x",
            SdVersion::V4 => "4.xx",
        };
        f.write_str(name)
    }
}

/// SD configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scr {
    /// The two words as read from the FIFO, card byte order.
    pub raw: [u32; 2],
    pub version: SdVersion,
    /// SD_BUS_WIDTHS field: bit 0 = 1-bit, bit 2 = 4-bit.
    pub bus_widths: u8,
}

impl Scr {
    /// Decode the 8 bytes returned by ACMD51. The SCR is sent MSB first.
    pub fn parse(bytes: &[u8; 8]) -> Self {
        let raw = [
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        ];
        let scr0 = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        let sd_spec = (scr0 >> 24) & 0xf;
        let sd_spec3 = (scr0 >> 15) & 0x1;
        let sd_spec4 = (scr0 >> 10) & 0x1;

        let version = match sd_spec {
            0 => SdVersion::V1,
            1 => SdVersion::V1_1,
            2 => match (sd_spec3, sd_spec4) {
                (0, _) => SdVersion::V2,
                (_, 0) => SdVersion::V3,
                _ => SdVersion::V4,
            },
            _ => SdVersion::Unknown,
        };

        Self {
            raw,
            version,
            bus_widths: ((scr0 >> 16) & 0xf) as u8,
        }
    }

    pub fn supports_4bit(&self) -> bool {
        self.bus_widths & SD_SCR_BUS_WIDTH_4 != 0
    }
}
