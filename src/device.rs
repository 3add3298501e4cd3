//! Device registry.
//!
//! A [`Device`] describes one emulated or virtual target: which artifact
//! slots a job must fill, which runtime parameters it understands, how long
//! the deploy and boot phases may take, and which job template renders it.
//! Devices are built once from the static tables in [`qemu`] and [`fvp`] and
//! never mutated afterwards.

pub mod fvp;
pub mod qemu;

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::artifact::CachePolicy;
use crate::error::InvalidArgument;
use crate::test_model::ParamSpec;

/// An artifact slot a device may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Kernel,
    Rootfs,
    Modules,
    Dtb,
    Bios,
    Bl1,
    ApRomfw,
    McpFw,
    McpRomfw,
    ScpFw,
    ScpRomfw,
    Fip,
}

impl Slot {
    /// Every slot, in canonical order.
    pub const ALL: [Slot; 12] = [
        Slot::Kernel,
        Slot::Rootfs,
        Slot::Modules,
        Slot::Dtb,
        Slot::Bios,
        Slot::Bl1,
        Slot::ApRomfw,
        Slot::McpFw,
        Slot::McpRomfw,
        Slot::ScpFw,
        Slot::ScpRomfw,
        Slot::Fip,
    ];

    /// Name used in job definitions and cache keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Kernel => "kernel",
            Slot::Rootfs => "rootfs",
            Slot::Modules => "modules",
            Slot::Dtb => "dtb",
            Slot::Bios => "bios",
            Slot::Bl1 => "bl1",
            Slot::ApRomfw => "ap_romfw",
            Slot::McpFw => "mcp_fw",
            Slot::McpRomfw => "mcp_romfw",
            Slot::ScpFw => "scp_fw",
            Slot::ScpRomfw => "scp_romfw",
            Slot::Fip => "fip",
        }
    }

    /// Command-line flag that fills this slot.
    pub fn flag(self) -> String {
        format!("--{}", self.as_str().replace('_', "-"))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub slot: Slot,
    /// A job cannot be rendered without this slot (after defaults).
    pub required: bool,
    /// Location relative to the storage base URL used when the user supplies
    /// nothing.
    pub default: Option<&'static str>,
    /// Remote compressed content is stored decoded.
    pub decompress: bool,
}

impl SlotSpec {
    pub const fn required(slot: Slot) -> Self {
        Self {
            slot,
            required: true,
            default: None,
            decompress: false,
        }
    }

    pub const fn optional(slot: Slot) -> Self {
        Self {
            slot,
            required: false,
            default: None,
            decompress: false,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn decompressed(mut self) -> Self {
        self.decompress = true;
        self
    }

    /// Cache policy for artifacts filling this slot.
    pub fn policy(&self) -> CachePolicy {
        let policy = CachePolicy::new(self.slot.as_str());
        if self.decompress {
            policy.decompressed()
        } else {
            policy
        }
    }
}

/// QEMU machine description passed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QemuMachine {
    /// QEMU architecture (`arm64`, `mipsel`, `s390x`, ...).
    pub arch: &'static str,
    pub machine: &'static str,
    pub cpu: &'static str,
    pub console: &'static str,
}

/// Operating system booted on a Morello FVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorelloOs {
    Android,
    Busybox,
    Oe,
    Ubuntu,
}

impl MorelloOs {
    pub fn as_str(self) -> &'static str {
        match self {
            MorelloOs::Android => "android",
            MorelloOs::Busybox => "busybox",
            MorelloOs::Oe => "oe",
            MorelloOs::Ubuntu => "ubuntu",
        }
    }
}

/// Job template a device renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTemplate {
    Qemu(QemuMachine),
    FvpAemva,
    FvpMorello(MorelloOs),
}

/// Immutable device descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: &'static str,
    /// Kernel architecture name.
    pub arch: &'static str,
    pub template: DeviceTemplate,
    /// Slots in rendering order.
    pub slots: Vec<SlotSpec>,
    /// Parameters accepted when no test is requested.
    pub parameters: &'static [ParamSpec],
    /// Default deploy timeout in minutes.
    pub deploy_timeout: u32,
    /// Default boot timeout in minutes.
    pub boot_timeout: u32,
    /// Shell prompts that mark a completed boot.
    pub prompts: &'static [&'static str],
}

impl Device {
    /// Looks a device up by exact name.
    ///
    /// # Example
    ///
    /// ```
    /// use bootrun::device::Device;
    ///
    /// let device = Device::select("qemu-arm64").unwrap();
    /// assert_eq!(device.arch, "arm64");
    /// assert!(Device::select("qemu-arm65").is_err());
    /// ```
    pub fn select(name: &str) -> Result<&'static Device, InvalidArgument> {
        registry().select(name)
    }

    /// All device names in registry order.
    pub fn list() -> Vec<&'static str> {
        registry().iter().map(|d| d.name).collect()
    }

    /// Device for a kernel build architecture.
    pub fn for_build_arch(arch: &str) -> Result<&'static Device, InvalidArgument> {
        let name = BUILD_ARCH_DEVICES
            .iter()
            .find(|(build_arch, _)| *build_arch == arch)
            .map(|(_, device)| *device)
            .ok_or_else(|| {
                InvalidArgument::new(format!("no device for build architecture '{}'", arch))
            })?;
        Self::select(name)
    }

    /// The slot description of `slot`, if this device has it.
    pub fn slot(&self, slot: Slot) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    pub fn is_qemu(&self) -> bool {
        matches!(self.template, DeviceTemplate::Qemu(_))
    }
}

/// Build architecture to device mapping for build-output directories.
const BUILD_ARCH_DEVICES: &[(&str, &str)] = &[
    ("arm64", "qemu-arm64"),
    ("arm", "qemu-armv7"),
    ("i386", "qemu-i386"),
    ("mips", "qemu-mips32"),
    ("powerpc", "qemu-ppc64"),
    ("riscv", "qemu-riscv64"),
    ("s390", "qemu-s390"),
    ("sh", "qemu-sh4"),
    ("sparc", "qemu-sparc64"),
    ("x86_64", "qemu-x86_64"),
];

/// Immutable name → device table.
pub struct DeviceRegistry {
    devices: Vec<Device>,
    index: HashMap<&'static str, usize>,
}

impl DeviceRegistry {
    fn new(devices: Vec<Device>) -> Self {
        let index = devices
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name, i))
            .collect();
        Self { devices, index }
    }

    pub fn select(&self, name: &str) -> Result<&Device, InvalidArgument> {
        self.index
            .get(name)
            .map(|&i| &self.devices[i])
            .ok_or_else(|| InvalidArgument::new(format!("unknown device '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }
}

/// The process-wide device registry.
pub fn registry() -> &'static DeviceRegistry {
    static REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut devices = qemu::devices();
        devices.extend(fvp::devices());
        DeviceRegistry::new(devices)
    })
}
