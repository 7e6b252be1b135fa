use std::{fs::read_to_string, path::Path};

use assert_cmd::Command;
use qmref::{aggregate::AggregatedDataset, results::ResultsFile};
use tempfile::{TempDir, tempdir};

/// set up a directory holding the water trajectory and a config running the
/// test worker on the local queue in `batches` batches
fn setup(batches: usize) -> std::io::Result<TempDir> {
    let dir = tempdir()?;
    std::fs::copy("testfiles/water.xyz", dir.path().join("water.xyz"))?;
    let worker = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testfiles")
        .join("worker.sh");
    std::fs::write(
        dir.path().join("qmref.toml"),
        format!(
            r#"queue = "local"
command = "bash {} {{{{.geom}}}} {{{{.results}}}}"
seed = 1

[[target]]
name = "water"
trajectory = "water.xyz"
batches = {batches}
"#,
            worker.display()
        ),
    )?;
    Ok(dir)
}

fn qmref(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("qmref").unwrap();
    cmd.arg("qmref.toml").current_dir(dir);
    cmd
}

#[test]
fn usage() {
    let output = Command::cargo_bin("qmref").unwrap().output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn too_many_args() {
    let output = Command::cargo_bin("qmref")
        .unwrap()
        .args(["a.toml", "b.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn missing_config() {
    let dir = tempdir().unwrap();
    let output = Command::cargo_bin("qmref")
        .unwrap()
        .arg("nope.toml")
        .current_dir(&dir)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.toml"));
}

#[test]
fn json() -> std::io::Result<()> {
    let dir = setup(2)?;
    let output = qmref(&dir).arg("--json").output()?;
    assert!(output.status.success());
    let got: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(got["targets"][0]["batches"], 2);
    assert!(!dir.path().join("qmref.out").exists());
    Ok(())
}

#[test]
fn run() -> std::io::Result<()> {
    let dir = setup(2)?;
    let assert = qmref(&dir).assert();
    let output = assert.get_output();
    assert!(
        output.status.success(),
        "stderr: {}\nlog: {}",
        String::from_utf8_lossy(&output.stderr),
        read_to_string(dir.path().join("qmref.log"))?,
    );

    let out = read_to_string(dir.path().join("qmref.out"))?;
    assert!(out.contains(
        "7 snapshots in 2 batches: 2 staged, 0 reused, 2 completed"
    ));
    assert!(out.contains("normal termination of qmref"));

    let dataset_path = dir.path().join("water/dataset.json");
    let got = AggregatedDataset::load(&dataset_path).unwrap();
    assert_eq!(got.batches, 0..2);
    let want = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
    assert_eq!(got.energies.len(), want.len());
    for (g, w) in got.energies.iter().zip(want) {
        approx::assert_abs_diff_eq!(*g, w, epsilon = 1e-12);
    }
    let first = read_to_string(&dataset_path)?;

    // rerunning reuses every batch and reproduces the dataset exactly
    let output = qmref(&dir).output()?;
    assert!(output.status.success());
    let out = read_to_string(dir.path().join("qmref.out"))?;
    assert!(out.contains("0 staged, 2 reused, 0 completed"));
    assert_eq!(read_to_string(&dataset_path)?, first);

    Ok(())
}

#[test]
fn drift() -> std::io::Result<()> {
    let dir = setup(2)?;
    assert!(qmref(&dir).output()?.status.success());

    let path = dir.path().join("water/0/results.json");
    let mut stored = ResultsFile::load(&path).unwrap();
    stored.snapshots[1].coords[0][2] -= 0.01;
    stored.write(&path).unwrap();

    let output = qmref(&dir).output()?;
    assert_eq!(output.status.code(), Some(1));
    let log = read_to_string(dir.path().join("qmref.log"))?;
    assert!(log.contains("geometry of batch 0 is inconsistent"));
    Ok(())
}

#[test]
fn no_staging() -> std::io::Result<()> {
    let dir = setup(3)?;
    let config = dir.path().join("qmref.toml");
    let s = read_to_string(&config)?;
    std::fs::write(&config, s.replace("seed = 1", "seed = 1\nstage = false"))?;

    let output = qmref(&dir).output()?;
    assert_eq!(output.status.code(), Some(1));
    let log = read_to_string(dir.path().join("qmref.log"))?;
    assert!(log.contains("generating geometries is not supported"));
    Ok(())
}
