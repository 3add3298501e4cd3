//! QEMU system emulation targets.
//!
//! Every QEMU device boots a default kernel and root filesystem from the
//! storage base URL unless the user overrides them.

use super::{Device, DeviceTemplate, QemuMachine, Slot, SlotSpec};

/// Deploy timeout in minutes.
const DEPLOY_TIMEOUT: u32 = 15;

/// Boot timeout in minutes.
const BOOT_TIMEOUT: u32 = 15;

const PROMPTS: &[&str] = &["root@(.*):[/~]#"];

struct QemuSpec {
    name: &'static str,
    arch: &'static str,
    machine: QemuMachine,
    kernel: &'static str,
    rootfs: &'static str,
    dtb: Option<&'static str>,
    bios: bool,
}

const fn machine(
    arch: &'static str,
    machine: &'static str,
    cpu: &'static str,
    console: &'static str,
) -> QemuMachine {
    QemuMachine {
        arch,
        machine,
        cpu,
        console,
    }
}

const QEMU_DEVICES: &[QemuSpec] = &[
    QemuSpec {
        name: "qemu-arm64",
        arch: "arm64",
        machine: machine("arm64", "virt,gic-version=3,mte=on", "max,pauth-impdef=on", "ttyAMA0"),
        kernel: "arm64/Image",
        rootfs: "arm64/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-armv5",
        arch: "arm",
        machine: machine("arm", "versatilepb", "arm926", "ttyAMA0"),
        kernel: "armv5/zImage",
        rootfs: "armv5/rootfs.ext4.zst",
        dtb: Some("armv5/versatile-pb.dtb"),
        bios: false,
    },
    QemuSpec {
        name: "qemu-armv7",
        arch: "arm",
        machine: machine("arm", "virt,gic-version=3", "cortex-a15", "ttyAMA0"),
        kernel: "armv7/zImage",
        rootfs: "armv7/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-i386",
        arch: "i386",
        machine: machine("i386", "q35", "coreduo", "ttyS0"),
        kernel: "i386/bzImage",
        rootfs: "i386/rootfs.ext4.zst",
        dtb: None,
        bios: true,
    },
    QemuSpec {
        name: "qemu-mips32",
        arch: "mips",
        machine: machine("mips", "malta", "mips32r6-generic", "ttyS0"),
        kernel: "mips32/vmlinux",
        rootfs: "mips32/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-mips32el",
        arch: "mips",
        machine: machine("mipsel", "malta", "mips32r6-generic", "ttyS0"),
        kernel: "mips32el/vmlinux",
        rootfs: "mips32el/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-mips64",
        arch: "mips",
        machine: machine("mips64", "malta", "I6400", "ttyS0"),
        kernel: "mips64/vmlinux",
        rootfs: "mips64/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-mips64el",
        arch: "mips",
        machine: machine("mips64el", "malta", "I6400", "ttyS0"),
        kernel: "mips64el/vmlinux",
        rootfs: "mips64el/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-ppc32",
        arch: "powerpc",
        machine: machine("ppc", "ppce500", "e500mc", "ttyS0"),
        kernel: "ppc32/uImage",
        rootfs: "ppc32/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-ppc64",
        arch: "powerpc",
        machine: machine("ppc64", "pseries", "POWER8", "hvc0"),
        kernel: "ppc64/vmlinux",
        rootfs: "ppc64/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-ppc64le",
        arch: "powerpc",
        machine: machine("ppc64le", "pseries", "POWER8", "hvc0"),
        kernel: "ppc64le/vmlinux",
        rootfs: "ppc64le/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-riscv64",
        arch: "riscv",
        machine: machine("riscv64", "virt", "rv64", "ttyS0"),
        kernel: "riscv64/Image",
        rootfs: "riscv64/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-s390",
        arch: "s390",
        machine: machine("s390x", "s390-ccw-virtio", "max,zpci=on", "ttyS0"),
        kernel: "s390/bzImage",
        rootfs: "s390/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-sh4",
        arch: "sh",
        machine: machine("sh4", "r2d", "sh7785", "ttySC1"),
        kernel: "sh4/zImage",
        rootfs: "sh4/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-sparc64",
        arch: "sparc",
        machine: machine("sparc64", "sun4u", "TI UltraSparc IIi", "ttyS0"),
        kernel: "sparc64/vmlinux",
        rootfs: "sparc64/rootfs.ext4.zst",
        dtb: None,
        bios: false,
    },
    QemuSpec {
        name: "qemu-x86_64",
        arch: "x86_64",
        machine: machine("x86_64", "q35", "Nehalem", "ttyS0"),
        kernel: "x86_64/bzImage",
        rootfs: "x86_64/rootfs.ext4.zst",
        dtb: None,
        bios: true,
    },
];

impl QemuSpec {
    fn device(&self) -> Device {
        let mut slots = vec![
            SlotSpec::required(Slot::Kernel).with_default(self.kernel),
            SlotSpec::required(Slot::Rootfs).with_default(self.rootfs),
            SlotSpec::optional(Slot::Modules),
        ];
        if let Some(dtb) = self.dtb {
            slots.push(
                SlotSpec::required(Slot::Dtb)
                    .with_default(dtb)
                    .decompressed(),
            );
        }
        if self.bios {
            slots.push(SlotSpec::optional(Slot::Bios).decompressed());
        }

        Device {
            name: self.name,
            arch: self.arch,
            template: DeviceTemplate::Qemu(self.machine),
            slots,
            parameters: &[],
            deploy_timeout: DEPLOY_TIMEOUT,
            boot_timeout: BOOT_TIMEOUT,
            prompts: PROMPTS,
        }
    }
}

/// QEMU devices in registry order.
pub(super) fn devices() -> Vec<Device> {
    QEMU_DEVICES.iter().map(QemuSpec::device).collect()
}
