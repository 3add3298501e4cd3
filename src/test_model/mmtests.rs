//! mmtests benchmark configurations.
//!
//! Each test runs one mmtests configuration for a fixed number of
//! iterations; the configuration file ships in the test-definition bundle.

use super::{Test, TestTemplate};

const DEVICES: &[&str] = &["qemu-arm64", "qemu-x86_64"];

/// Timeout in minutes, shared by every configuration.
const TIMEOUT: u32 = 90;

macro_rules! mmtest {
    ($config:literal, $iterations:literal) => {
        (
            concat!("mmtests-", $config),
            concat!("configs/config-", $config),
            $iterations,
        )
    };
}

/// (test name, configuration file, iterations)
const CONFIGURATIONS: &[(&str, &str, u32)] = &[
    mmtest!("db-sqlite-insert-small", 10),
    mmtest!("hpc-scimarkc-small", 20),
    mmtest!("io-blogbench", 30),
    mmtest!("io-fio-randread-async-randwrite", 10),
    mmtest!("io-fio-randread-async-seqwrite", 10),
    mmtest!("io-fio-randread-sync-heavywrite", 10),
    mmtest!("io-fio-randread-sync-randwrite", 10),
    mmtest!("io-fsmark-small-file-stream", 10),
    mmtest!("memdb-redis-benchmark-small", 20),
    mmtest!("memdb-redis-memtier-small", 20),
    mmtest!("scheduler-schbench", 10),
    mmtest!("scheduler-sysbench-cpu", 10),
    mmtest!("scheduler-sysbench-thread", 10),
    mmtest!("workload-aim9-disk", 10),
    mmtest!("workload-coremark", 20),
    mmtest!("workload-cyclictest-fine-hackbench", 15),
    mmtest!("workload-cyclictest-hackbench", 20),
    mmtest!("workload-ebizzy", 10),
    mmtest!("workload-pmqtest-hackbench", 10),
    mmtest!("workload-stressng-af-alg", 10),
    mmtest!("workload-stressng-bad-altstack", 10),
    mmtest!("workload-stressng-class-io-parallel", 10),
    mmtest!("workload-stressng-context", 10),
    mmtest!("workload-stressng-fork", 10),
    mmtest!("workload-stressng-get", 10),
    mmtest!("workload-stressng-getdent", 10),
    mmtest!("workload-stressng-madvise", 10),
    mmtest!("workload-stressng-mmap", 10),
    mmtest!("workload-stressng-vm-splice", 10),
    mmtest!("workload-stressng-zombie", 10),
    mmtest!("workload-usemem", 10),
    mmtest!("workload-will-it-scale-io-processes", 10),
    mmtest!("workload-will-it-scale-io-threads", 10),
    mmtest!("workload-will-it-scale-pf-processes", 10),
    mmtest!("workload-will-it-scale-pf-threads", 10),
    mmtest!("workload-will-it-scale-sys-processes", 10),
    mmtest!("workload-will-it-scale-sys-threads", 10),
];

pub(super) fn tests() -> Vec<Test> {
    CONFIGURATIONS
        .iter()
        .map(|&(name, configfile, iterations)| Test {
            name,
            devices: DEVICES,
            timeout: TIMEOUT,
            parameters: &[],
            need_test_definition: true,
            template: TestTemplate::Mmtests {
                configfile,
                iterations,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configurations() {
        let tests = tests();
        assert_eq!(tests.len(), 37);

        let blogbench = tests
            .iter()
            .find(|t| t.name == "mmtests-io-blogbench")
            .unwrap();
        assert_eq!(
            blogbench.template,
            TestTemplate::Mmtests {
                configfile: "configs/config-io-blogbench",
                iterations: 30,
            }
        );
        assert_eq!(blogbench.timeout, 90);
    }

    #[test]
    fn test_only_arm64_and_x86_64() {
        for test in tests() {
            assert!(test.supports("qemu-arm64"));
            assert!(test.supports("qemu-x86_64"));
            assert!(!test.supports("qemu-i386"));
        }
    }
}
