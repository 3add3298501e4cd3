//! Test registry.
//!
//! A [`Test`] is a named workload: which devices it runs on, how long it may
//! take, which parameters it accepts and whether it needs the external
//! test-definition bundle. Large families (LTP suites, mmtests benchmark
//! configurations, Morello userspace suites) are rows in static tables
//! consumed by the same generic type.

pub mod ltp;
pub mod mmtests;
pub mod morello;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::device::Device;
use crate::error::InvalidArgument;

/// How a parameter value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Passed through verbatim.
    Text,
    /// An artifact reference, resolved and passed as a `file://` URL.
    Artifact,
}

/// A named runtime parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Allowed values; empty means anything goes.
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Text,
            required: false,
            allowed: &[],
        }
    }

    pub const fn artifact(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Artifact,
            required: false,
            allowed: &[],
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    /// Checks `value` against the allowed set.
    pub fn validate(&self, value: &str) -> Result<(), InvalidArgument> {
        if self.allowed.is_empty() || self.allowed.contains(&value) {
            Ok(())
        } else {
            Err(InvalidArgument::new(format!(
                "invalid value '{}' for parameter {} (expected one of: {})",
                value,
                self.name,
                self.allowed.join(", ")
            )))
        }
    }
}

/// Job template a test renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTemplate {
    /// Runs the user's shell command.
    Command,
    Kunit,
    Ltp { suite: &'static str },
    Mmtests {
        configfile: &'static str,
        iterations: u32,
    },
    /// Morello userspace suites; the suite is the test name.
    Morello,
    V4l2,
}

/// Immutable test descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub name: &'static str,
    /// Device names or `*` patterns this test runs on.
    pub devices: &'static [&'static str],
    /// Default timeout in minutes.
    pub timeout: u32,
    pub parameters: &'static [ParamSpec],
    /// The test-definition bundle must be deployed alongside.
    pub need_test_definition: bool,
    pub template: TestTemplate,
}

impl Test {
    /// Looks a test up by exact name.
    ///
    /// # Example
    ///
    /// ```
    /// use bootrun::test_model::Test;
    ///
    /// let ltp = Test::select("ltp-smoke").unwrap();
    /// assert!(ltp.need_test_definition);
    /// assert!(Test::select("ltp").is_err());
    /// ```
    pub fn select(name: &str) -> Result<&'static Test, InvalidArgument> {
        registry().select(name)
    }

    /// All test names, sorted.
    pub fn list() -> Vec<&'static str> {
        registry().iter().map(|t| t.name).collect()
    }

    /// Whether this test can run on the named device.
    pub fn supports(&self, device: &str) -> bool {
        self.devices
            .iter()
            .any(|pattern| matches_pattern(pattern, device))
    }

    /// Rejects an unsupported (device, test) pairing.
    pub fn check_device(&self, device: &Device) -> Result<(), InvalidArgument> {
        if self.supports(device.name) {
            Ok(())
        } else {
            Err(InvalidArgument::new(format!(
                "test '{}' is not supported on device '{}'",
                self.name, device.name
            )))
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Matches a device name against an exact name or a pattern with one `*`.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => pattern == name,
    }
}

const QEMU_AND_AEMVA: &[&str] = &["qemu-*", "fvp-aemva"];

fn core_tests() -> Vec<Test> {
    vec![
        Test {
            name: "command",
            devices: &["qemu-*", "fvp-*"],
            timeout: 2,
            parameters: &[],
            need_test_definition: false,
            template: TestTemplate::Command,
        },
        Test {
            name: "kunit",
            devices: QEMU_AND_AEMVA,
            timeout: 1,
            parameters: &[],
            need_test_definition: false,
            template: TestTemplate::Kunit,
        },
        Test {
            name: "v4l2",
            devices: QEMU_AND_AEMVA,
            timeout: 25,
            parameters: &[],
            need_test_definition: true,
            template: TestTemplate::V4l2,
        },
    ]
}

/// Immutable name → test table.
pub struct TestRegistry {
    tests: Vec<Test>,
    index: HashMap<&'static str, usize>,
}

impl TestRegistry {
    fn new(mut tests: Vec<Test>) -> Self {
        tests.sort_by_key(|t| t.name);
        let index = tests.iter().enumerate().map(|(i, t)| (t.name, i)).collect();
        Self { tests, index }
    }

    pub fn select(&self, name: &str) -> Result<&Test, InvalidArgument> {
        self.index
            .get(name)
            .map(|&i| &self.tests[i])
            .ok_or_else(|| InvalidArgument::new(format!("unknown test '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }
}

/// The process-wide test registry.
pub fn registry() -> &'static TestRegistry {
    static REGISTRY: OnceLock<TestRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut tests = core_tests();
        tests.extend(ltp::tests());
        tests.extend(mmtests::tests());
        tests.extend(morello::tests());
        TestRegistry::new(tests)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_select_is_total_and_injective() {
        let names = Test::list();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        for name in names {
            assert_eq!(Test::select(name).unwrap().name, name);
        }
    }

    #[test]
    fn test_list_is_sorted() {
        let names = Test::list();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"ltp-smoke"));
        assert!(names.contains(&"mmtests-workload-usemem"));
        assert!(names.contains(&"bionic"));
    }

    #[test]
    fn test_unknown_test() {
        let err = Test::select("ltp-everything").unwrap_err();
        assert!(err.to_string().contains("ltp-everything"));
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("qemu-*", "qemu-arm64"));
        assert!(!matches_pattern("qemu-*", "fvp-aemva"));
        assert!(matches_pattern("fvp-aemva", "fvp-aemva"));
        assert!(!matches_pattern("fvp-aemva", "fvp-aemva2"));
        assert!(matches_pattern("*-arm64", "qemu-arm64"));
        assert!(!matches_pattern("qemu-*4", "qemu-"));
    }

    #[test]
    fn test_pairing_check_names_both() {
        let test = Test::select("mmtests-workload-usemem").unwrap();
        let device = Device::select("qemu-armv7").unwrap();
        let err = test.check_device(device).unwrap_err();
        assert!(err.to_string().contains("mmtests-workload-usemem"));
        assert!(err.to_string().contains("qemu-armv7"));

        assert!(test.check_device(Device::select("qemu-x86_64").unwrap()).is_ok());
    }

    #[test]
    fn test_every_test_supports_some_device() {
        let devices = Device::list();
        for test in registry().iter() {
            assert!(
                devices.iter().any(|d| test.supports(d)),
                "{} runs nowhere",
                test.name
            );
        }
    }

    #[test]
    fn test_param_validation() {
        let spec = ParamSpec::text("BIONIC_TEST_TYPE").one_of(&["static", "dynamic"]);
        assert!(spec.validate("static").is_ok());
        let err = spec.validate("invalid").unwrap_err();
        assert!(err.to_string().contains("BIONIC_TEST_TYPE"));
        assert!(err.to_string().contains("invalid"));

        assert!(ParamSpec::text("GTEST_FILTER").validate("anything").is_ok());
    }
}
