//! Linux Test Project suites.

use super::{QEMU_AND_AEMVA, Test, TestTemplate};

/// (test name, timeout in minutes); the suite is the name without `ltp-`.
const LTP_TESTS: &[(&str, u32)] = &[
    ("ltp-commands", 10),
    ("ltp-containers", 10),
    ("ltp-controllers", 60),
    ("ltp-crypto", 5),
    ("ltp-cve", 20),
    ("ltp-dio", 20),
    ("ltp-fcntl-locktests", 1),
    ("ltp-fs", 25),
    ("ltp-fs_bind", 15),
    ("ltp-fs_perms_simple", 2),
    ("ltp-fsx", 3),
    ("ltp-hugetlb", 3),
    ("ltp-io", 2),
    ("ltp-ipc", 2),
    ("ltp-math", 5),
    ("ltp-mm", 20),
    ("ltp-nptl", 15),
    ("ltp-pty", 5),
    ("ltp-sched", 15),
    ("ltp-securebits", 1),
    ("ltp-smoke", 2),
    ("ltp-syscalls", 60),
    ("ltp-tracing", 10),
];

pub(super) fn tests() -> Vec<Test> {
    LTP_TESTS
        .iter()
        .map(|&(name, timeout)| Test {
            name,
            devices: QEMU_AND_AEMVA,
            timeout,
            parameters: &[],
            need_test_definition: true,
            template: TestTemplate::Ltp {
                suite: name.trim_start_matches("ltp-"),
            },
        })
        .collect()
}
