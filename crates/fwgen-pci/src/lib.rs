//! Donor PCIe device access.
//!
//! Everything a build needs to know about a donor function starts here: the
//! sysfs-rooted reader ([`SysfsReader`]), the configuration-space image
//! ([`ConfigSpace`]), the capability walker ([`parse_capabilities`]), the BAR
//! analyzer ([`analyze_bars`]) and the MSI-X analyzer ([`analyze_msix`]).
//!
//! All parsing is pure: the walkers treat the byte image as untrusted input,
//! never mutate it, and never panic on malformed contents.

pub mod bars;
pub mod bdf;
pub mod caps;
pub mod config_space;
pub mod error;
pub mod msix;
pub mod sysfs;

pub use bars::{analyze_bars, BarDescriptor, BarKind, BarSet, ExpansionRomDescriptor};
pub use bdf::Bdf;
pub use caps::{parse_capabilities, Capability, CapabilityKind, MsixCapability};
pub use config_space::ConfigSpace;
pub use error::PciError;
pub use msix::{analyze_msix, MsixInfo};
pub use sysfs::{ResourceEntry, ResourceFlags, SysfsReader, DEFAULT_SYSFS_ROOT, SYSFS_ROOT_ENV};
