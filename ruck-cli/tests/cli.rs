use assert_cmd::Command;
use image::{ImageBuffer, Rgba};
use predicates::prelude::*;

fn ruck() -> Command {
    Command::cargo_bin("ruck").unwrap()
}

fn write_png(path: &std::path::Path, w: u32, h: u32) {
    let img: image::RgbaImage = ImageBuffer::from_pixel(w, h, Rgba([1, 2, 3, 255]));
    img.save(path).unwrap();
}

#[test]
fn bundle_then_ls_then_cat_round_trips_a_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello world").unwrap();
    let manifest = dir.path().join("assets.json");
    std::fs::write(&manifest, r#"{"files": {"hello": {"path": "hello.txt"}}}"#).unwrap();
    let bundle_path = dir.path().join("out.bundle");

    ruck()
        .args(["bundle", manifest.to_str().unwrap(), bundle_path.to_str().unwrap(), "--prefix", dir.path().to_str().unwrap()])
        .assert()
        .success();

    ruck()
        .args(["ls", bundle_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    ruck()
        .args(["cat", bundle_path.to_str().unwrap(), "hello"])
        .assert()
        .success()
        .stdout(predicate::eq("hello world"));
}

#[test]
fn bundle_is_verbose_about_new_and_up_to_date_entries() {
    let dir = assert_fs::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    let manifest = dir.path().join("assets.json");
    std::fs::write(&manifest, r#"{"files": {"a": {"path": "a.txt"}}}"#).unwrap();
    let bundle_path = dir.path().join("out.bundle");

    ruck()
        .args([
            "bundle",
            manifest.to_str().unwrap(),
            bundle_path.to_str().unwrap(),
            "--prefix",
            dir.path().to_str().unwrap(),
            "--verbose",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("New file: a"));

    ruck()
        .args([
            "bundle",
            manifest.to_str().unwrap(),
            bundle_path.to_str().unwrap(),
            "--prefix",
            dir.path().to_str().unwrap(),
            "--verbose",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("File up to date: a"));
}

#[test]
fn cat_texture_outputs_a_valid_png() {
    let dir = assert_fs::TempDir::new().unwrap();
    write_png(&dir.path().join("sprite.png"), 8, 8);
    let manifest = dir.path().join("assets.json");
    std::fs::write(
        &manifest,
        r#"{"textures": {"atlas": {"images": {"sprite": {"path": "sprite.png"}}}}}"#,
    )
    .unwrap();
    let bundle_path = dir.path().join("out.bundle");

    ruck()
        .args(["bundle", manifest.to_str().unwrap(), bundle_path.to_str().unwrap(), "--prefix", dir.path().to_str().unwrap()])
        .assert()
        .success();

    let output = ruck()
        .args(["cat", bundle_path.to_str().unwrap(), "atlas", "--texture"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(&output[..8], b"\x89PNG\r\n\x1a\n");
}

#[test]
fn cat_unknown_resource_fails() {
    let dir = assert_fs::TempDir::new().unwrap();
    let bundle_path = dir.path().join("out.bundle");
    ruck().args(["bundle", "-", bundle_path.to_str().unwrap()]).write_stdin("{}").assert().success();

    ruck()
        .args(["cat", bundle_path.to_str().unwrap(), "missing"])
        .assert()
        .failure();
}

#[test]
fn help_with_unrecognized_command_fails() {
    ruck().args(["help", "frobnicate"]).assert().failure();
}

#[test]
fn help_bundle_prints_usage() {
    ruck()
        .args(["help", "bundle"])
        .assert()
        .success()
        .stderr(predicate::str::contains("ruck bundle"));
}
