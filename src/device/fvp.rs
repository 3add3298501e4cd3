//! Arm Fixed Virtual Platforms.
//!
//! The Morello platforms boot from user-supplied firmware; nothing has a
//! default. The AEMv-A base platform ships with defaults for everything.

use super::{Device, DeviceTemplate, MorelloOs, Slot, SlotSpec};
use crate::test_model::{ParamKind, ParamSpec};

const DEPLOY_TIMEOUT: u32 = 5;
const BOOT_TIMEOUT: u32 = 20;

const ANDROID_PARAMETERS: &[ParamSpec] = &[ParamSpec::artifact("USERDATA")];

fn morello_slots(rootfs: bool) -> Vec<SlotSpec> {
    let mut slots = vec![
        SlotSpec::required(Slot::ApRomfw).decompressed(),
        SlotSpec::required(Slot::McpFw).decompressed(),
        SlotSpec::required(Slot::McpRomfw).decompressed(),
    ];
    if rootfs {
        slots.push(SlotSpec::required(Slot::Rootfs));
    }
    slots.extend([
        SlotSpec::required(Slot::ScpFw).decompressed(),
        SlotSpec::required(Slot::ScpRomfw).decompressed(),
        SlotSpec::required(Slot::Fip).decompressed(),
    ]);
    slots
}

fn morello(name: &'static str, os: MorelloOs, prompts: &'static [&'static str]) -> Device {
    Device {
        name,
        arch: "arm64",
        template: DeviceTemplate::FvpMorello(os),
        slots: morello_slots(os != MorelloOs::Ubuntu),
        parameters: match os {
            MorelloOs::Android => ANDROID_PARAMETERS,
            _ => &[],
        },
        deploy_timeout: DEPLOY_TIMEOUT,
        boot_timeout: BOOT_TIMEOUT,
        prompts,
    }
}

fn aemva() -> Device {
    Device {
        name: "fvp-aemva",
        arch: "arm64",
        template: DeviceTemplate::FvpAemva,
        slots: vec![
            SlotSpec::required(Slot::Bl1)
                .with_default("fvp-aemva/bl1.bin")
                .decompressed(),
            SlotSpec::required(Slot::Fip)
                .with_default("fvp-aemva/fip.bin")
                .decompressed(),
            SlotSpec::required(Slot::Kernel).with_default("fvp-aemva/Image"),
            SlotSpec::required(Slot::Dtb)
                .with_default("fvp-aemva/fvp-base-revc.dtb")
                .decompressed(),
            SlotSpec::required(Slot::Rootfs).with_default("fvp-aemva/rootfs.ext4.zst"),
            SlotSpec::optional(Slot::Modules),
        ],
        parameters: &[],
        deploy_timeout: DEPLOY_TIMEOUT,
        boot_timeout: BOOT_TIMEOUT,
        prompts: &["root@(.*):[/~]#"],
    }
}

/// FVP devices in registry order.
pub(super) fn devices() -> Vec<Device> {
    vec![
        aemva(),
        morello("fvp-morello-android", MorelloOs::Android, &["console:/ "]),
        morello("fvp-morello-busybox", MorelloOs::Busybox, &["/ # "]),
        morello("fvp-morello-oe", MorelloOs::Oe, &["root@morello-fvp:~# "]),
        morello("fvp-morello-ubuntu", MorelloOs::Ubuntu, &["morello@morello-server:"]),
    ]
}
