//! Morello userspace suites.
//!
//! The Android library suites run against prebuilt system images passed as
//! artifact parameters; only the Android platform can run them.

use super::{ParamSpec, Test, TestTemplate};

const ANDROID: &[&str] = &["fvp-morello-android"];
const MORELLO_NON_UBUNTU: &[&str] = &[
    "fvp-morello-android",
    "fvp-morello-busybox",
    "fvp-morello-oe",
];

const SYSTEM_URL: ParamSpec = ParamSpec::artifact("SYSTEM_URL").required();
const USERDATA: ParamSpec = ParamSpec::artifact("USERDATA").required();

const BIONIC: &[ParamSpec] = &[
    ParamSpec::text("GTEST_FILTER"),
    ParamSpec::text("BIONIC_TEST_TYPE").one_of(&["static", "dynamic"]),
];
const SYSTEM_ONLY: &[ParamSpec] = &[SYSTEM_URL];
const USERDATA_ONLY: &[ParamSpec] = &[USERDATA];
const LIBJPEG_TURBO: &[ParamSpec] = &[
    SYSTEM_URL,
    ParamSpec::artifact("LIBJPEG_TURBO_URL").required(),
];
const LIBPDFIUM: &[ParamSpec] = &[SYSTEM_URL, ParamSpec::artifact("PDFIUM_URL").required()];
const LIBPNG: &[ParamSpec] = &[SYSTEM_URL, ParamSpec::artifact("PNG_URL").required()];
const LLDB: &[ParamSpec] = &[
    ParamSpec::artifact("LLDB_URL").required(),
    ParamSpec::artifact("TC_URL").required(),
];

/// (name, devices, timeout in minutes, parameters)
const MORELLO_TESTS: &[(&str, &[&str], u32, &[ParamSpec])] = &[
    ("binder", ANDROID, 12, &[]),
    ("bionic", ANDROID, 1000, BIONIC),
    ("boringssl", ANDROID, 240, SYSTEM_ONLY),
    ("compartment", ANDROID, 15, USERDATA_ONLY),
    ("device-tree", MORELLO_NON_UBUNTU, 3, &[]),
    ("dvfs", MORELLO_NON_UBUNTU, 3, &[]),
    ("libjpeg-turbo", ANDROID, 50, LIBJPEG_TURBO),
    ("libpdfium", ANDROID, 30, LIBPDFIUM),
    ("libpng", ANDROID, 30, LIBPNG),
    ("lldb", ANDROID, 15, LLDB),
    ("logd", ANDROID, 420, USERDATA_ONLY),
    ("multicore", MORELLO_NON_UBUNTU, 5, &[]),
    ("zlib", ANDROID, 25, SYSTEM_ONLY),
];

pub(super) fn tests() -> Vec<Test> {
    MORELLO_TESTS
        .iter()
        .map(|&(name, devices, timeout, parameters)| Test {
            name,
            devices,
            timeout,
            parameters,
            need_test_definition: true,
            template: TestTemplate::Morello,
        })
        .collect()
}
