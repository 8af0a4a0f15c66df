//! Static descriptors for the supported PCILeech boards.

use crate::error::BoardError;

/// Which PCIe hard-IP generation the board's part carries; selects between
/// the 7-series and UltraScale IP-configuration scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    Pcie7Series,
    UltraScale,
}

impl IpFamily {
    /// The `pcie.ip_family` context value.
    pub fn context_value(self) -> &'static str {
        match self {
            IpFamily::Pcie7Series => "pcie7x",
            IpFamily::UltraScale => "ultrascale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDescriptor {
    pub name: &'static str,
    pub fpga_part: &'static str,
    pub ip_family: IpFamily,
    pub default_bar0_size_kb: u32,
    /// Constraint file path within the upstream board repo; `None` means the
    /// board only has the built-in fallback pinout.
    pub pinout_xdc_source: Option<&'static str>,
}

/// Every board the generator can target.
pub fn boards() -> &'static [BoardDescriptor] {
    const BOARDS: &[BoardDescriptor] = &[
        BoardDescriptor {
            name: "pcileech_35t325_x1",
            fpga_part: "xc7a35tcsg324-2",
            ip_family: IpFamily::Pcie7Series,
            default_bar0_size_kb: 4,
            pinout_xdc_source: Some("pcileech_35t325_x1/pcileech_35t325_x1.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_35t325_x4",
            fpga_part: "xc7a35tcsg324-2",
            ip_family: IpFamily::Pcie7Series,
            default_bar0_size_kb: 4,
            pinout_xdc_source: Some("pcileech_35t325_x4/pcileech_35t325_x4.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_75t484_x1",
            fpga_part: "xc7a75tfgg484-2",
            ip_family: IpFamily::Pcie7Series,
            default_bar0_size_kb: 16,
            pinout_xdc_source: Some("pcileech_75t484_x1/pcileech_75t484_x1.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_100t484_x1",
            fpga_part: "xc7a100tfgg484-2",
            ip_family: IpFamily::Pcie7Series,
            default_bar0_size_kb: 16,
            pinout_xdc_source: Some("pcileech_100t484_x1/pcileech_100t484_x1.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_enigma_x1",
            fpga_part: "xc7a75tfgg484-2",
            ip_family: IpFamily::Pcie7Series,
            default_bar0_size_kb: 16,
            pinout_xdc_source: Some("pcileech_enigma_x1/pcileech_enigma_x1.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_ku035_x4",
            fpga_part: "xcku035-ffva1156-2-e",
            ip_family: IpFamily::UltraScale,
            default_bar0_size_kb: 64,
            pinout_xdc_source: Some("pcileech_ku035_x4/pcileech_ku035_x4.xdc"),
        },
        BoardDescriptor {
            name: "pcileech_zdma_x8",
            fpga_part: "xczu19eg-ffvc1760-2-e",
            ip_family: IpFamily::UltraScale,
            default_bar0_size_kb: 64,
            pinout_xdc_source: None,
        },
    ];
    BOARDS
}

/// Looks a board up by name.
pub fn board(name: &str) -> Result<&'static BoardDescriptor, BoardError> {
    boards()
        .iter()
        .find(|b| b.name == name)
        .ok_or_else(|| BoardError::UnknownBoard {
            name: name.to_string(),
        })
}
