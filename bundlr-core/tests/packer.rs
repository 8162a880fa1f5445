mod common;

use bundlr_core::collect::collect_dir;
use bundlr_core::packer::Packer;
use bundlr_core::{Bundle, Error};
use std::fs;

#[test]
fn add_missing_source_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    let mut p = Packer::new(td.path().join("out.blr"));
    let err = p.add("a.txt", td.path().join("missing.txt")).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert!(p.is_empty());
}

#[test]
fn add_directory_or_empty_path_is_invalid() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("f");
    fs::write(&src, b"x").unwrap();
    let mut p = Packer::new(td.path().join("out.blr"));
    assert!(matches!(p.add("d", td.path()).unwrap_err(), Error::InvalidArgument(_)));
    assert!(matches!(p.add("/", &src).unwrap_err(), Error::InvalidArgument(_)));
    assert!(matches!(p.add("", &src).unwrap_err(), Error::InvalidArgument(_)));
}

#[test]
fn paths_are_normalized_on_add() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("f");
    fs::write(&src, b"abc").unwrap();
    let out = td.path().join("out.blr");
    let mut p = Packer::new(&out);
    p.add("\\textures\\wall.png", &src).unwrap();
    p.add("/sounds/a.ogg", &src).unwrap();
    let report = p.pack().unwrap();
    let names: Vec<&str> = report.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(names, vec!["textures/wall.png", "sounds/a.ogg"]);

    let b = Bundle::open(&out).unwrap();
    assert!(b.has("TEXTURES/wall.png"));
    assert!(b.has("sounds/A.OGG"));
}

#[test]
fn remove_unregisters_case_insensitively() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("f");
    fs::write(&src, b"abc").unwrap();
    let out = td.path().join("out.blr");
    let mut p = Packer::new(&out);
    p.add("keep.txt", &src).unwrap();
    p.add("Drop.txt", &src).unwrap();
    assert!(p.remove("DROP.TXT"));
    assert!(!p.remove("drop.txt"));
    assert_eq!(p.len(), 1);
    p.pack().unwrap();
    assert_eq!(Bundle::open(&out).unwrap().file_list(), vec!["keep.txt".to_string()]);
}

#[test]
fn pack_fails_when_source_vanishes() {
    let td = tempfile::tempdir().unwrap();
    let a = td.path().join("a");
    let b = td.path().join("b");
    fs::write(&a, b"a").unwrap();
    fs::write(&b, b"b").unwrap();
    let mut p = Packer::new(td.path().join("out.blr"));
    p.add("a", &a).unwrap();
    p.add("b", &b).unwrap();
    fs::remove_file(&b).unwrap();
    let err = p.pack().unwrap_err();
    assert!(matches!(err, Error::NotFound(ref path) if path == &b), "got {err:?}");
}

#[test]
fn add_dir_skips_os_metadata_and_excludes() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("assets");
    fs::create_dir_all(root.join("img/.thumbs")).unwrap();
    fs::create_dir_all(root.join("tmp")).unwrap();
    fs::write(root.join("readme.md"), b"# hi").unwrap();
    fs::write(root.join("img/logo.png"), common::random_bytes(37, 1)).unwrap();
    fs::write(root.join("img/.DS_Store"), b"junk").unwrap();
    fs::write(root.join("Thumbs.db"), b"junk").unwrap();
    fs::write(root.join("tmp/scratch.bin"), b"junk").unwrap();
    fs::write(root.join("img/notes.bak"), b"junk").unwrap();

    let out = td.path().join("assets.blr");
    let mut p = Packer::new(&out);
    let n = p.add_dir(&root, &["tmp/**".to_string(), "**/*.bak".to_string()]).unwrap();
    assert_eq!(n, 2);
    p.pack().unwrap();

    let b = Bundle::open(&out).unwrap();
    assert_eq!(b.file_list(), vec!["img/logo.png".to_string(), "readme.md".to_string()]);
    let logo = b.get_metadata("img/logo.png").unwrap();
    assert_eq!(b.read_to_vec(&logo).unwrap(), common::random_bytes(37, 1));
}

#[test]
fn add_dir_on_missing_root_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    let mut p = Packer::new(td.path().join("out.blr"));
    let err = p.add_dir(&td.path().join("nope"), &[]).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn bad_exclude_pattern_is_reported() {
    let td = tempfile::tempdir().unwrap();
    let err = collect_dir(td.path(), &["a[".to_string()]).unwrap_err();
    assert!(matches!(err, Error::Pattern(_)), "got {err:?}");
}

#[test]
fn collect_dir_is_sorted_and_relative() {
    let td = tempfile::tempdir().unwrap();
    fs::create_dir_all(td.path().join("b/c")).unwrap();
    fs::write(td.path().join("z.txt"), b"").unwrap();
    fs::write(td.path().join("b/c/d.txt"), b"").unwrap();
    fs::write(td.path().join("a.txt"), b"").unwrap();
    let got: Vec<String> = collect_dir(td.path(), &[]).unwrap().into_iter().map(|c| c.rel_path).collect();
    assert_eq!(got, vec!["a.txt", "b/c/d.txt", "z.txt"]);
}

#[test]
fn report_matches_written_file() {
    let td = tempfile::tempdir().unwrap();
    let one = common::random_bytes(100, 3);
    let two = common::random_bytes(1, 4);
    let (out, report) = common::pack(td.path(), "r.blr", &[("one", one.as_slice()), ("two", two.as_slice())]);
    assert_eq!(report.output, out);
    assert_eq!(report.total_bytes, fs::metadata(&out).unwrap().len());
    assert_eq!(report.entries[1].pos, 104);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["version"]["major"], 1);
}

#[test]
fn repacking_into_the_source_dir_skips_the_output() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("assets");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), b"aaa").unwrap();
    let out = root.join("out.blr");

    let mut p = Packer::new(&out);
    assert_eq!(p.add_dir(&root, &[]).unwrap(), 1);
    p.pack().unwrap();

    let mut again = Packer::new(&out);
    assert_eq!(again.add_dir(&root, &[]).unwrap(), 1);
    let report = again.pack().unwrap();
    assert_eq!(report.files, 1);
    let b = Bundle::open(&out).unwrap();
    assert_eq!(b.file_list(), vec!["a.txt".to_string()]);
    let a = b.get_metadata("a.txt").unwrap();
    assert_eq!(b.read_to_vec(&a).unwrap(), b"aaa");
}

#[test]
fn adding_the_output_explicitly_fails_the_pack() {
    let td = tempfile::tempdir().unwrap();
    let (out, _) = common::pack(td.path(), "self.blr", &[("a.txt", b"a")]);
    let before = fs::read(&out).unwrap();

    let mut p = Packer::new(&out);
    p.add("self.blr", &out).unwrap();
    let err = p.pack().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
    assert_eq!(fs::read(&out).unwrap(), before);
}
