//! Per-device and per-test job fragments.
//!
//! Every function here is pure: it reads a [`RenderContext`] and returns a
//! piece of the job document. Dispatch on device and test templates is an
//! exhaustive `match`, so a new variant without a fragment does not compile.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use super::ResolvedArtifact;
use super::document::{
    BootAction, DeployAction, Minutes, TestAction, TestDefinitionEntry, mapping,
};
use crate::device::{Device, DeviceTemplate, MorelloOs, QemuMachine, Slot};
use crate::test_model::{ParamKind, Test, TestTemplate};

/// Flat bag of everything a fragment may need.
pub struct RenderContext<'a> {
    pub device: &'static Device,
    pub execution_id: &'a str,
    /// Device images in slot order.
    pub images: &'a [(Slot, ResolvedArtifact)],
    pub overlays: &'a [ResolvedArtifact],
    /// Parameter values, artifacts already turned into `file://` URLs.
    pub parameters: &'a BTreeMap<String, String>,
    pub test_definitions: Option<&'a ResolvedArtifact>,
    pub boot_args: Option<&'a str>,
    pub command: &'a [String],
    pub deploy_timeout: u32,
    pub boot_timeout: u32,
}

impl RenderContext<'_> {
    fn image(&self, slot: Slot) -> Option<&ResolvedArtifact> {
        self.images
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, artifact)| artifact)
    }
}

const FVP_MORELLO_IMAGE: &str = "fvp:morello-0.11.34";
const FVP_AEMVA_IMAGE: &str = "fvp:aemva-11.24.11";
const FVP_CONSOLE: &str = r"terminal_0: Listening for serial connection on port (?P<PORT>\d+)";

/// `device_type` of the job.
pub fn device_type(device: &Device) -> &'static str {
    match device.template {
        DeviceTemplate::Qemu(_) => "qemu",
        DeviceTemplate::FvpAemva | DeviceTemplate::FvpMorello(_) => "fvp",
    }
}

/// Top-level `context` section.
pub fn context(ctx: &RenderContext<'_>) -> Mapping {
    match ctx.device.template {
        DeviceTemplate::Qemu(machine) => mapping([
            ("arch", machine.arch),
            ("cpu", machine.cpu),
            ("machine", machine.machine),
            ("guestfs_interface", "virtio"),
            ("netdevice", "user"),
            ("console_device", machine.console),
        ]),
        DeviceTemplate::FvpAemva | DeviceTemplate::FvpMorello(_) => {
            mapping([("arch", ctx.device.arch)])
        }
    }
}

fn image_entry(artifact: &ResolvedArtifact) -> Mapping {
    let mut entry = mapping([("url", artifact.url.as_str())]);
    if let Some(compression) = artifact.compression {
        entry.insert("compression".into(), compression.into());
    }
    entry
}

fn tar_overlay(artifact: &ResolvedArtifact) -> Mapping {
    let mut entry = image_entry(artifact);
    entry.insert("format".into(), "tar".into());
    entry.insert("path".into(), "/".into());
    entry
}

fn kernel_command_line(ctx: &RenderContext<'_>, machine: &QemuMachine) -> String {
    let mut line = format!(
        "console={},115200 rootwait root=/dev/vda debug verbose console_msg_format=syslog",
        machine.console
    );
    if let Some(args) = ctx.boot_args {
        line.push(' ');
        line.push_str(args);
    }
    line
}

/// The rootfs overlays: modules first, then user overlays in request order.
fn rootfs_overlays(ctx: &RenderContext<'_>) -> Mapping {
    let mut overlays = Mapping::new();
    if let Some(modules) = ctx.image(Slot::Modules) {
        overlays.insert("modules".into(), tar_overlay(modules).into());
    }
    for (i, overlay) in ctx.overlays.iter().enumerate() {
        overlays.insert(
            Value::from(format!("overlay-{:02}", i)),
            tar_overlay(overlay).into(),
        );
    }
    overlays
}

/// The deploy action.
pub fn deploy(ctx: &RenderContext<'_>) -> DeployAction {
    let mut images = Mapping::new();
    let to = match ctx.device.template {
        DeviceTemplate::Qemu(machine) => {
            for (slot, artifact) in ctx.images {
                let mut entry = image_entry(artifact);
                let image_arg = match slot {
                    Slot::Kernel => format!(
                        "-kernel {{kernel}} -append \"{}\"",
                        kernel_command_line(ctx, &machine)
                    ),
                    Slot::Rootfs => "-drive file={rootfs},if=virtio,format=raw".to_string(),
                    Slot::Dtb => "-dtb {dtb}".to_string(),
                    Slot::Bios => "-bios {bios}".to_string(),
                    // Applied as a rootfs overlay.
                    Slot::Modules => continue,
                    Slot::Bl1
                    | Slot::ApRomfw
                    | Slot::McpFw
                    | Slot::McpRomfw
                    | Slot::ScpFw
                    | Slot::ScpRomfw
                    | Slot::Fip => continue,
                };
                entry.insert("image_arg".into(), image_arg.into());
                if *slot == Slot::Rootfs {
                    let overlays = rootfs_overlays(ctx);
                    if !overlays.is_empty() {
                        entry.insert("overlays".into(), overlays.into());
                    }
                }
                images.insert(slot.as_str().into(), entry.into());
            }
            "tmpfs"
        }
        DeviceTemplate::FvpAemva | DeviceTemplate::FvpMorello(_) => {
            for (slot, artifact) in ctx.images {
                if *slot == Slot::Modules {
                    continue;
                }
                let mut entry = image_entry(artifact);
                if *slot == Slot::Rootfs {
                    let overlays = rootfs_overlays(ctx);
                    if !overlays.is_empty() {
                        entry.insert("overlays".into(), overlays.into());
                    }
                }
                images.insert(slot.as_str().into(), entry.into());
            }
            for spec in ctx.device.parameters {
                if spec.kind != ParamKind::Artifact {
                    continue;
                }
                if let Some(url) = ctx.parameters.get(spec.name) {
                    images.insert(
                        spec.name.to_lowercase().into(),
                        mapping([("url", url.as_str())]).into(),
                    );
                }
            }
            "fvp"
        }
    };

    DeployAction {
        timeout: Minutes::new(ctx.deploy_timeout),
        to: to.to_string(),
        images,
    }
}

fn fvp_arguments(device: &Device, template: DeviceTemplate) -> Vec<Value> {
    let arguments: &[(Slot, &str)] = match template {
        DeviceTemplate::FvpAemva => &[
            (Slot::Bl1, "-C bp.secureflashloader.fname={BL1}"),
            (Slot::Fip, "-C bp.flashloader0.fname={FIP}"),
            (Slot::Kernel, "--data cluster0.cpu0={KERNEL}@0x80080000"),
            (Slot::Dtb, "--data cluster0.cpu0={DTB}@0x82000000"),
            (Slot::Rootfs, "-C bp.virtioblockdevice.image_path={ROOTFS}"),
        ],
        DeviceTemplate::FvpMorello(_) => &[
            (Slot::ApRomfw, "-C css.trustedBootROMloader.fname={AP_ROMFW}"),
            (Slot::ScpRomfw, "-C css.scp.ROMloader.fname={SCP_ROMFW}"),
            (Slot::McpRomfw, "-C css.mcp.ROMloader.fname={MCP_ROMFW}"),
            (Slot::ScpFw, "--data Morello_Top.css.scp.armcortexm7ct={SCP_FW}@0x14000000"),
            (Slot::McpFw, "--data Morello_Top.css.mcp.armcortexm7ct={MCP_FW}@0x16000000"),
            (Slot::Fip, "-C board.ap_qspi_flash_loader.fname={FIP}"),
            (Slot::Rootfs, "-C board.virtioblockdevice.image_path={ROOTFS}"),
        ],
        DeviceTemplate::Qemu(_) => &[],
    };
    arguments
        .iter()
        .filter(|(slot, _)| device.slot(*slot).is_some())
        .map(|(_, arg)| Value::from(*arg))
        .collect()
}

/// The boot action.
pub fn boot(ctx: &RenderContext<'_>) -> BootAction {
    let (method, options) = match ctx.device.template {
        DeviceTemplate::Qemu(_) => ("qemu", mapping([("media", "tmpfs")])),
        template @ (DeviceTemplate::FvpAemva | DeviceTemplate::FvpMorello(_)) => {
            let (image, model) = match template {
                DeviceTemplate::FvpMorello(_) => (
                    FVP_MORELLO_IMAGE,
                    "/opt/model/FVP_Morello/models/Linux64_GCC-6.4/FVP_Morello",
                ),
                _ => (
                    FVP_AEMVA_IMAGE,
                    "/opt/model/Base_RevC_AEMvA_pkg/models/Linux64_GCC-9.3/FVP_Base_RevC-2xAEMvA",
                ),
            };
            let mut options = Mapping::new();
            options.insert(
                "docker".into(),
                mapping([
                    ("name", Value::from(image)),
                    ("local", Value::from(true)),
                    ("container_name", Value::from(ctx.execution_id)),
                ])
                .into(),
            );
            options.insert("image".into(), model.into());
            options.insert("console_string".into(), FVP_CONSOLE.into());
            options.insert(
                "arguments".into(),
                Value::Sequence(fvp_arguments(ctx.device, template)),
            );
            ("fvp", options)
        }
    };

    BootAction {
        timeout: Minutes::new(ctx.boot_timeout),
        method: method.to_string(),
        prompts: ctx.device.prompts.iter().map(|p| p.to_string()).collect(),
        options,
    }
}

fn inline(name: &str, description: &str, steps: Vec<String>) -> TestDefinitionEntry {
    let metadata = mapping([
        ("format", "Lava-Test Test Definition 1.0"),
        ("name", name),
        ("description", description),
    ]);
    let run = mapping([("steps", Value::from(steps))]);
    TestDefinitionEntry {
        from: "inline".to_string(),
        name: name.to_string(),
        path: format!("inline/{}.yaml", name),
        repository: mapping([("metadata", Value::from(metadata)), ("run", Value::from(run))]).into(),
        compression: None,
        parameters: Mapping::new(),
    }
}

fn from_bundle(
    ctx: &RenderContext<'_>,
    name: &str,
    path: String,
    parameters: Mapping,
) -> TestDefinitionEntry {
    // Tests needing the bundle always have one after planning.
    let (repository, compression) = match ctx.test_definitions {
        Some(bundle) => (Value::from(bundle.url.as_str()), bundle.compression),
        None => (Value::Null, None),
    };
    TestDefinitionEntry {
        from: "url".to_string(),
        name: name.to_string(),
        path,
        repository,
        compression: compression.map(str::to_string),
        parameters,
    }
}

/// The test action of one test.
pub fn test(ctx: &RenderContext<'_>, test: &Test, timeout: u32) -> TestAction {
    let definition = match test.template {
        TestTemplate::Command => inline(
            "commands",
            "Run user commands",
            vec![shell_words::join(ctx.command)],
        ),
        TestTemplate::Kunit => inline(
            "kunit",
            "Collect KUnit results",
            vec![
                "mount -t debugfs debugfs /sys/kernel/debug || true".to_string(),
                "for suite in /sys/kernel/debug/kunit/*; do lava-test-case \"$(basename \"$suite\")\" --shell grep -q '^ok' \"$suite/results\"; done".to_string(),
            ],
        ),
        TestTemplate::Ltp { suite } => from_bundle(
            ctx,
            test.name,
            "automated/linux/ltp/ltp.yaml".to_string(),
            mapping([
                ("TST_CMDFILES", suite),
                ("SKIPFILE", "skipfile-lkft.yaml"),
                ("BOARD", "qemu"),
                ("ENVIRONMENT", "production"),
                ("TIMEOUT_MULTIPLIER", "3"),
                ("ROOT", "/opt/ltp"),
            ]),
        ),
        TestTemplate::Mmtests {
            configfile,
            iterations,
        } => from_bundle(
            ctx,
            test.name,
            "automated/linux/mmtests/mmtests.yaml".to_string(),
            mapping([
                ("CONFIG", Value::from(configfile)),
                ("ITERATIONS", Value::from(iterations)),
                ("FULL_ARCHIVE", Value::from(true)),
            ]),
        ),
        TestTemplate::Morello => {
            let family = match ctx.device.template {
                DeviceTemplate::FvpMorello(MorelloOs::Android) => "android",
                DeviceTemplate::FvpMorello(_)
                | DeviceTemplate::FvpAemva
                | DeviceTemplate::Qemu(_) => "linux",
            };
            let parameters = test
                .parameters
                .iter()
                .filter_map(|spec| {
                    ctx.parameters
                        .get(spec.name)
                        .map(|value| (Value::from(spec.name), Value::from(value.as_str())))
                })
                .collect();
            from_bundle(
                ctx,
                test.name,
                format!("automated/{}/morello/{}.yaml", family, test.name),
                parameters,
            )
        }
        TestTemplate::V4l2 => from_bundle(
            ctx,
            test.name,
            "automated/linux/v4l2/v4l2-compliance.yaml".to_string(),
            mapping([("VIDEO_DEVICE", "/dev/video0"), ("VIDEO_DRIVER", "vivid")]),
        ),
    };

    TestAction {
        timeout: Minutes::new(timeout),
        definitions: vec![definition],
    }
}
