use assert_cmd::Command;
use predicates::prelude::*;

fn afu_dma() -> Command {
    let mut cmd = Command::cargo_bin("afu-dma").unwrap();
    cmd.env_remove("AFU_ACCEL_UUID").env_remove("RUST_LOG");
    cmd
}

#[test]
fn simulated_run_prints_outputs() {
    let out = afu_dma()
        .args(["--sim", "--sim-latency", "4", "--check", "256"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 17);
    assert!(lines[..16].iter().all(|l| *l == "16"));
    assert_eq!(lines[16], "All DMA Tests Successful!!!");
}

#[test]
fn oversized_input_is_a_runtime_error() {
    afu_dma()
        .args(["--sim", "2305843009213693952"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR: cannot allocate"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn missing_driver_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("fpga_region");
    afu_dma()
        .arg("--sysfs-root")
        .arg(&root)
        .arg("128")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("ERROR: No FPGA driver found."));
}

#[test]
fn missing_afu_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let port = tmp.path().join("region0").join("dfl-port.0");
    std::fs::create_dir_all(&port).unwrap();
    std::fs::write(port.join("afu_id"), "c000c9660d8242729aeffe5f84570612\n").unwrap();

    afu_dma()
        .arg("--sysfs-root")
        .arg(tmp.path())
        .args(["--afu-id", "331db30c-9885-41ea-9081-f88b8f655caa", "128"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "ERROR: FPGA with accelerator 331db30c-9885-41ea-9081-f88b8f655caa not found.",
        ));
}

#[test]
fn usage_errors_exit_with_one() {
    for args in [&[][..], &["100"][..], &["0"][..], &["abc"][..], &["128", "256"][..]] {
        afu_dma()
            .args(args)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Usage"));
    }
}

#[test]
fn bad_afu_id_is_a_usage_error() {
    afu_dma()
        .args(["--afu-id", "nope", "128"])
        .assert()
        .code(1);
}

#[test]
fn help_exits_cleanly() {
    afu_dma()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("multiple of 128"));
}
