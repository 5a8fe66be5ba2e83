use std::error::Error;
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli() -> Result<Command, Box<dyn Error>> {
    Ok(Command::cargo_bin("quire-cli")?)
}

#[test]
fn devices_lists_builtin_catalog_with_default_marker() -> Result<(), Box<dyn Error>> {
    cli()?
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("* Virtual Laser"))
        .stdout(predicate::str::contains("Virtual Receipt"))
        .stdout(predicate::str::contains("Virtual File Port"));
    Ok(())
}

#[test]
fn info_reports_landscape_custom_paper_as_axis_swap() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["info", "Virtual Laser", "--custom", "210x297", "--landscape"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Page size: 297 x 210 (0.1 mm)"));
    Ok(())
}

#[test]
fn info_on_unknown_device_fails() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["info", "Nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unavailable"));
    Ok(())
}

#[test]
fn unsupported_capability_is_reported() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["info", "Virtual Receipt", "--landscape"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not support orientation"));
    Ok(())
}

#[test]
fn zero_copies_is_rejected() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["print", "--copies", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid copies"));
    Ok(())
}

#[test]
fn print_writes_job_record_and_previews() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let record = dir.path().join("job.json");
    let previews = dir.path().join("previews");

    cli()?
        .args([
            "print",
            "Virtual File Port",
            "--pages",
            "2",
            "--unit",
            "tenths-mm",
            "--output",
            record.to_str().unwrap(),
            "--preview-dir",
            previews.to_str().unwrap(),
            "--zoom",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished job-1: 2 page(s)"));

    let contents = fs::read_to_string(&record)?;
    let report: serde_json::Value = serde_json::from_str(&contents)?;
    assert_eq!(report["device"], "Virtual File Port");
    assert_eq!(report["pages"].as_array().map(Vec::len), Some(2));
    assert!(previews.join("page-001.png").exists());
    assert!(previews.join("page-002.png").exists());
    Ok(())
}

#[test]
fn oversized_preview_is_refused() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    cli()?
        .args([
            "print",
            "--pages",
            "1",
            "--preview-dir",
            dir.path().to_str().unwrap(),
            "--zoom",
            "400",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds the pixel budget"));
    assert!(!dir.path().join("page-001.png").exists());
    Ok(())
}

#[test]
fn custom_paper_on_a_fixed_sheet_device_is_refused() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["info", "Virtual File Port", "--custom", "100x150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not support custom paper size"));
    Ok(())
}

#[test]
fn file_port_without_redirection_is_declined() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["print", "Virtual File Port"])
        .assert()
        .success()
        .stdout(predicate::str::contains("declined"));
    Ok(())
}

#[test]
fn external_delete_cancels_remaining_pages() -> Result<(), Box<dyn Error>> {
    cli()?
        .args(["print", "--pages", "3", "--cancel-after", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("was cancelled before page 2"));
    Ok(())
}

#[test]
fn exported_settings_apply_to_a_later_job() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let blob = dir.path().join("laser.qdev");

    cli()?
        .args([
            "settings",
            "export",
            "Virtual Laser",
            "--copies",
            "3",
            "--duplex",
            "long-edge",
            "--output",
            blob.to_str().unwrap(),
        ])
        .assert()
        .success();

    cli()?
        .args(["settings", "show", blob.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Device: Virtual Laser"))
        .stdout(predicate::str::contains("Copies: 3"))
        .stdout(predicate::str::contains("Duplex: LongEdge"));

    cli()?
        .args(["print", "Virtual Laser", "--settings", blob.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished job-1"));
    Ok(())
}

#[test]
fn foreign_settings_are_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let blob = dir.path().join("receipt.qdev");
    cli()?
        .args([
            "settings",
            "export",
            "Virtual Receipt",
            "--output",
            blob.to_str().unwrap(),
        ])
        .assert()
        .success();

    cli()?
        .args(["print", "Virtual Laser", "--settings", blob.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid settings blob"));
    Ok(())
}

#[test]
fn config_updates_persist() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let config = dir.path().join("session.json");

    cli()?
        .args([
            "--config",
            config.to_str().unwrap(),
            "config",
            "--resync",
            "eager",
            "--unit",
            "hundredths-inch",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resync\": \"eager\""));

    let saved = fs::read_to_string(&config)?;
    assert!(saved.contains("\"logical_unit\": \"hundredths-inch\""));

    cli()?
        .args(["--config", config.to_str().unwrap(), "print", "--pages", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished job-1: 2 page(s)"));
    Ok(())
}

#[test]
fn custom_catalog_replaces_builtin_devices() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let catalog = dir.path().join("catalog.json");
    fs::write(
        &catalog,
        r#"{
            "default_device": "Plotter",
            "devices": [
                {
                    "name": "Plotter",
                    "dpi": { "x": 400, "y": 400 },
                    "papers": [
                        { "id": 8, "name": "A3", "size": { "width": 2970, "height": 4200 } }
                    ],
                    "default_paper": 8
                }
            ]
        }"#,
    )?;

    cli()?
        .args(["--catalog", catalog.to_str().unwrap(), "devices"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* Plotter"))
        .stdout(predicate::str::contains("Virtual Laser").not());

    cli()?
        .args(["--catalog", catalog.to_str().unwrap(), "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Page size: 2970 x 4200 (0.1 mm)"))
        .stdout(predicate::str::contains("Resolution: 400 x 400 dpi"));
    Ok(())
}
