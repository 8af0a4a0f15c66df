use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PciError;

/// A PCIe Bus/Device/Function address, formatted `DDDD:BB:DD.F`.
///
/// Serializes as the canonical string form so profiles stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bdf {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Bdf {
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }
}

impl FromStr for Bdf {
    type Err = PciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PciError::MalformedBdf {
            input: s.to_string(),
        };

        let (domain, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (bus, rest) = rest.split_once(':').ok_or_else(malformed)?;
        let (device, function) = rest.split_once('.').ok_or_else(malformed)?;
        if domain.len() != 4 || bus.len() != 2 || device.len() != 2 || function.len() != 1 {
            return Err(malformed());
        }

        let bdf = Bdf {
            domain: u16::from_str_radix(domain, 16).map_err(|_| malformed())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| malformed())?,
            device: u8::from_str_radix(device, 16).map_err(|_| malformed())?,
            function: u8::from_str_radix(function, 16).map_err(|_| malformed())?,
        };
        // Device number is 5 bits, function 3 bits.
        if bdf.device >= 0x20 || bdf.function >= 0x8 {
            return Err(malformed());
        }
        Ok(bdf)
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl TryFrom<String> for Bdf {
    type Error = PciError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Bdf> for String {
    fn from(bdf: Bdf) -> Self {
        bdf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let bdf: Bdf = "0000:03:00.0".parse().unwrap();
        assert_eq!(bdf, Bdf::new(0, 3, 0, 0));
        assert_eq!(bdf.to_string(), "0000:03:00.0");
    }

    #[test]
    fn parses_nonzero_domain_and_hex_digits() {
        let bdf: Bdf = "00a1:1f:1e.7".parse().unwrap();
        assert_eq!(bdf, Bdf::new(0xa1, 0x1f, 0x1e, 7));
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in [
            "",
            "0000:03:00",
            "0000:03.00.0",
            "000:03:00.0",
            "0000:3:00.0",
            "0000:03:00.8",
            "0000:03:20.0",
            "zzzz:03:00.0",
            "0000:03:00.0 ",
        ] {
            let err = input.parse::<Bdf>().unwrap_err();
            assert!(
                matches!(err, PciError::MalformedBdf { .. }),
                "input `{input}` should be rejected as malformed"
            );
        }
    }

    #[test]
    fn display_round_trips() {
        for text in ["0000:00:00.0", "0001:ff:1f.7", "abcd:12:0a.3"] {
            let bdf: Bdf = text.parse().unwrap();
            assert_eq!(bdf.to_string(), text);
        }
    }
}
