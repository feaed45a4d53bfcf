use std::path::Path;
use std::process::Command;

fn certvault() -> Command {
    Command::new(env!("CARGO_BIN_EXE_certvault"))
}

fn write_gz(path: &Path, content: &str) {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    let mut enc = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(content.as_bytes()).unwrap();
    enc.finish().unwrap();
}

#[test]
fn store_setup_insert_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("store");

    let output = certvault()
        .args(["store", "setup"])
        .arg(&storage)
        .args(["--level", "2", "--maintain-info"])
        .output()
        .expect("failed to run certvault");
    assert!(output.status.success(), "setup failed: {output:?}");
    assert!(storage.join("CertFileDB.toml").exists());
    assert!(storage.join(".CertFileDB-META.toml").exists());

    // Setting up twice must fail
    let output = certvault().args(["store", "setup"]).arg(&storage).output().unwrap();
    assert!(!output.status.success());

    let pem = dir.path().join("aa112233.pem");
    std::fs::write(&pem, "-----BEGIN CERTIFICATE-----\nQUJD\n-----END CERTIFICATE-----").unwrap();
    let output = certvault().args(["store", "insert"]).arg(&storage).arg(&pem).output().unwrap();
    assert!(output.status.success(), "insert failed: {output:?}");

    let output = certvault()
        .args(["store", "get"])
        .arg(&storage)
        .arg("aa112233")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("BEGIN CERTIFICATE"));

    let output = certvault()
        .args(["store", "exists"])
        .arg(&storage)
        .args(["aa112233"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let output = certvault()
        .args(["store", "get"])
        .arg(&storage)
        .arg("deadbeef")
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn pipeline_run_produces_unified_chains() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    let mirror = dir.path().join("mirror");
    let storage = dir.path().join("store");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::create_dir_all(&mirror).unwrap();

    write_gz(
        &mirror.join("20200601-1591000000-https_get_443_certs.gz"),
        "aa000001,QUJD\nbb000002,REVG\n",
    );
    write_gz(
        &mirror.join("20200601-1591000000-https_get_443_hosts.gz"),
        "h1,aa000001\nh2,aa000001\nh2,bb000002\n",
    );

    let output = certvault().args(["store", "setup"]).arg(&storage).output().unwrap();
    assert!(output.status.success());

    // Collect and unify; analysis depends on verifier tools being installed
    let output = certvault()
        .arg("run")
        .arg(&repo)
        .arg("--store")
        .arg(&storage)
        .args(["--source", "rapid", "--date", "2020-06-01"])
        .arg("--mirror")
        .arg(&mirror)
        .args(["collect", "unify"])
        .output()
        .unwrap();
    assert!(output.status.success(), "pipeline failed: {output:?}");

    assert!(repo.join("RAPID/UNIFIED/20200601_443_chains.gz").exists());
    assert!(repo.join("RAPID/UNIFIED/20200601_443_broken_chains.gz").exists());
    assert!(repo.join("RAPID/UNIFIED/20200601_443_chains.log").exists());

    // Both certificates were deduplicated into the store
    let output = certvault()
        .args(["store", "exists"])
        .arg(&storage)
        .args(["aa000001", "bb000002"])
        .output()
        .unwrap();
    assert!(output.status.success());

    // The repository listing shows the unified dataset
    let output = certvault()
        .arg("repo")
        .arg(&repo)
        .args(["--source", "rapid", "--state", "unified"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listing = String::from_utf8_lossy(&output.stdout);
    assert!(listing.contains("RAPID"));
    assert!(listing.contains("20200601_443_chains.gz"));
}
