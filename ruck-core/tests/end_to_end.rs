use image::{ImageBuffer, Rgba};
use ruck_core::manifest::{ManifestDriver, StatusEvent};
use ruck_core::{Bundle, EntryKind};
use tempfile::tempdir;

fn write_png(path: &std::path::Path, w: u32, h: u32) {
    let img: image::RgbaImage = ImageBuffer::from_pixel(w, h, Rgba([7, 8, 9, 255]));
    img.save(path).unwrap();
}

fn run(bundle: &mut Bundle, prefix: &std::path::Path, manifest: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut driver = ManifestDriver::new(bundle, prefix);
    let mut on_status = |e: StatusEvent| {
        let (word, key) = match e {
            StatusEvent::New { key, .. } => ("new", key),
            StatusEvent::Updated { key, .. } => ("updated", key),
            StatusEvent::UpToDate { key, .. } => ("uptodate", key),
        };
        seen.push(format!("{word}:{key}"));
    };
    driver.feed(manifest.as_bytes(), &mut on_status).unwrap();
    driver.finish().unwrap();
    seen
}

#[test]
fn round_trips_a_small_text_file_through_a_closed_and_reopened_bundle() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("blah.txt");
    std::fs::write(&src, b"aoeu\n1234\n").unwrap();

    let path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&path).unwrap();
    bundle.add_file("blah", &src, 1).unwrap();
    bundle.close().unwrap();

    let mut reopened = Bundle::open(&path).unwrap();
    let entry = reopened.find("blah").unwrap().clone();
    assert_eq!(entry.kind, EntryKind::File);
    assert_eq!(reopened.file_size(&entry), 10);
    assert_eq!(reopened.file_read(&entry).unwrap(), b"aoeu\n1234\n");
}

#[test]
fn round_trips_a_large_binary_file_with_distinctive_boundary_bytes() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("blob.bin");
    let mut data = vec![b'x'; 23875];
    data[0] = b'#';
    data[data.len() - 2] = b'1';
    std::fs::write(&src, &data).unwrap();

    let path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&path).unwrap();
    bundle.add_file("blob", &src, 1).unwrap();
    bundle.close().unwrap();

    let mut reopened = Bundle::open(&path).unwrap();
    let entry = reopened.find("blob").unwrap().clone();
    assert_eq!(reopened.file_size(&entry), 23875);
    let read_back = reopened.file_read(&entry).unwrap();
    assert_eq!(read_back[0], b'#');
    assert_eq!(read_back[read_back.len() - 2], b'1');
    assert_eq!(read_back, data);
}

#[test]
fn rebundling_unchanged_sources_touches_nothing() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 4, 4);
    std::fs::write(dir.path().join("b.txt"), b"hi").unwrap();

    let manifest = r#"{
        "files": {"b": {"path": "b.txt"}},
        "textures": {"atlas": {"images": {"a": {"path": "a.png"}}}}
    }"#;

    let bundle_path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&bundle_path).unwrap();
    let mut first = run(&mut bundle, dir.path(), manifest);
    first.sort();
    assert_eq!(first, vec!["new:atlas".to_string(), "new:b".to_string()]);

    let second = run(&mut bundle, dir.path(), manifest);
    assert!(second.iter().all(|s| s.starts_with("uptodate:")));
}

#[test]
fn touching_one_source_rebuilds_only_that_entry() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
    let manifest = r#"{"files": {"a": {"path": "a.txt"}, "b": {"path": "b.txt"}}}"#;

    let bundle_path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&bundle_path).unwrap();
    run(&mut bundle, dir.path(), manifest);

    // mtime staleness is tracked with 1-second resolution; sleep past a tick
    // so the rewritten file is unambiguously newer than what was recorded.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    std::fs::write(dir.path().join("b.txt"), b"b2").unwrap();

    let events = run(&mut bundle, dir.path(), manifest);
    assert_eq!(events, vec!["uptodate:a".to_string(), "updated:b".to_string()]);
}

#[test]
fn replacing_a_file_with_a_smaller_payload_reuses_its_slot() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.bin");
    std::fs::write(&src, vec![b'x'; 200]).unwrap();

    let path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&path).unwrap();
    bundle.add_file("a", &src, 1).unwrap();
    bundle.close().unwrap();
    let len_before = std::fs::metadata(&path).unwrap().len();

    std::fs::write(&src, vec![b'y'; 50]).unwrap();
    let mut bundle = Bundle::open(&path).unwrap();
    bundle.add_file("a", &src, 2).unwrap();
    bundle.close().unwrap();
    let len_after = std::fs::metadata(&path).unwrap().len();

    assert_eq!(len_before, len_after);
}

#[test]
fn texture_page_respects_non_pow2_non_rotated_bounds() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("wide.png"), 200, 40);
    let manifest = r#"{
        "textures": {
            "atlas": {
                "maxWidth": 256, "maxHeight": 128, "pow2": false, "allowRotate90": false,
                "images": {"wide": {"path": "wide.png"}}
            }
        }
    }"#;

    let bundle_path = dir.path().join("out.bundle");
    let mut bundle = Bundle::open(&bundle_path).unwrap();
    run(&mut bundle, dir.path(), manifest);

    let entry = bundle.find("atlas").unwrap().clone();
    let tex = bundle.file_open_texture(&entry).unwrap();
    assert_eq!(tex.pages.len(), 1);
    assert!(tex.pages[0].width <= 256 && tex.pages[0].height <= 128);
    assert_eq!(tex.pages[0].width % 4, 0);
    assert_eq!(tex.pages[0].height % 4, 0);
}
