mod common;

use bundlr_core::config::OverlayConfig;
use bundlr_core::path_safety::PathPolicy;
use bundlr_core::{Bundles, CachePolicy, Error, ResourceLocator};
use std::fs;

#[cfg(target_family = "unix")]
fn symlink<P: AsRef<std::path::Path>, Q: AsRef<std::path::Path>>(src: P, dst: Q) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[test]
fn overlay_first_then_disk() {
    let td = tempfile::tempdir().unwrap();
    let (a, _) = common::pack(td.path(), "a.blr", &[("cfg/game.ini", b"packed")]);
    let root = td.path().join("disk");
    fs::create_dir_all(root.join("cfg")).unwrap();
    fs::write(root.join("cfg/game.ini"), b"loose").unwrap();
    fs::write(root.join("cfg/extra.ini"), b"only on disk").unwrap();

    let bundles = Bundles::default();
    bundles.load(&a).unwrap();
    let loc = ResourceLocator::new(bundles).with_disk_root(&root);

    let f = loc.open("CFG/GAME.INI").unwrap();
    assert!(f.is_bundled());
    assert_eq!(f.read_to_vec().unwrap(), b"packed");

    let f = loc.open("cfg/extra.ini").unwrap();
    assert!(!f.is_bundled());
    assert_eq!(f.size(), 12);
    assert_eq!(f.relative_path(), "cfg/extra.ini");
    let mut buf = [0u8; 4];
    f.read(&mut buf, 0, 5, 4).unwrap();
    assert_eq!(&buf, b"on d");
    assert!(matches!(f.read(&mut buf, 0, 10, 4).unwrap_err(), Error::OutOfRange { .. }));
    f.close();

    assert!(matches!(loc.open("cfg/none.ini").unwrap_err(), Error::NotFound(_)));
}

#[test]
fn without_disk_root_a_miss_is_not_found() {
    let loc = ResourceLocator::new(Bundles::default());
    assert!(loc.disk_root().is_none());
    assert!(matches!(loc.open("anything").unwrap_err(), Error::NotFound(_)));
}

#[test]
fn disk_fallback_rejects_escapes() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("disk");
    fs::create_dir_all(&root).unwrap();
    fs::write(td.path().join("secret.txt"), b"s").unwrap();
    let loc = ResourceLocator::new(Bundles::default()).with_disk_root(&root);

    for bad in ["../secret.txt", "a/../../secret.txt", "/etc/passwd", "\\secret.txt"] {
        let err = loc.open(bad).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{bad}: got {err:?}");
    }
}

#[cfg(target_family = "unix")]
#[test]
fn disk_fallback_symlinks_follow_policy() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("disk");
    fs::create_dir_all(root.join("real")).unwrap();
    fs::write(root.join("real/f.txt"), b"inside").unwrap();
    fs::write(td.path().join("outside.txt"), b"outside").unwrap();
    symlink(root.join("real"), root.join("alias")).unwrap();
    symlink(td.path(), root.join("evil")).unwrap();

    let strict = ResourceLocator::new(Bundles::default()).with_disk_root(&root);
    let msg = strict.open("alias/f.txt").unwrap_err().to_string();
    assert!(msg.contains("symlink"), "unexpected error: {msg}");

    let follow = ResourceLocator::new(Bundles::default())
        .with_disk_root(&root)
        .with_path_policy(PathPolicy { follow_symlinks: true });
    assert_eq!(follow.open("alias/f.txt").unwrap().read_to_vec().unwrap(), b"inside");
    let msg = follow.open("evil/outside.txt").unwrap_err().to_string();
    assert!(msg.contains("escapes root"), "unexpected error: {msg}");
}

#[test]
fn disk_handles_are_shared_per_path() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.txt"), b"aaaa").unwrap();
    fs::write(td.path().join("b.txt"), b"bb").unwrap();
    let loc = ResourceLocator::new(Bundles::default()).with_disk_root(td.path());

    let a1 = loc.open_disk("a.txt").unwrap();
    let a2 = loc.open_disk("a.txt").unwrap();
    let b = loc.open_disk("b.txt").unwrap();
    assert_eq!(loc.open_disk_files(), 2);
    drop(a1);
    assert_eq!(loc.open_disk_files(), 2);
    a2.close();
    assert_eq!(loc.open_disk_files(), 1);
    assert_eq!(b.size(), 2);
    drop(b);
    assert_eq!(loc.open_disk_files(), 0);
}

#[test]
fn overlay_config_builds_locator() {
    let td = tempfile::tempdir().unwrap();
    let (base, _) = common::pack(td.path(), "base.blr", &[("x", b"base"), ("y", b"base")]);
    let (patch, _) = common::pack(td.path(), "patch.blr", &[("x", b"patch")]);
    fs::write(td.path().join("z"), b"disk").unwrap();

    let json = serde_json::json!({
        "cache_policy": "always_cached",
        "disk_root": td.path(),
        "archives": [base, td.path().join("missing.blr"), patch],
    });
    let cfg_path = td.path().join("overlay.json");
    fs::write(&cfg_path, serde_json::to_vec_pretty(&json).unwrap()).unwrap();

    let cfg = OverlayConfig::from_json_file(&cfg_path).unwrap();
    assert_eq!(cfg.cache_policy, CachePolicy::AlwaysCached);
    assert!(!cfg.follow_symlinks);
    let loc = cfg.build();
    assert_eq!(loc.bundles().policy(), CachePolicy::AlwaysCached);
    assert_eq!(loc.bundles().loaded_count(), 2);
    assert_eq!(loc.open("x").unwrap().read_to_vec().unwrap(), b"patch");
    assert_eq!(loc.open("y").unwrap().read_to_vec().unwrap(), b"base");
    assert_eq!(loc.open("z").unwrap().read_to_vec().unwrap(), b"disk");
}

#[test]
fn overlay_config_defaults_and_errors() {
    let cfg = OverlayConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg, OverlayConfig::default());
    assert_eq!(cfg.cache_policy, CachePolicy::RefCounted);

    let err = OverlayConfig::from_json_str(r#"{"cache_policy": "sometimes"}"#).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn unreadable_bundle_does_not_fall_back_to_disk() {
    let td = tempfile::tempdir().unwrap();
    let (a, _) = common::pack(td.path(), "a.blr", &[("x", b"bundled")]);
    let root = td.path().join("disk");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("x"), b"stale-disk").unwrap();

    let bundles = Bundles::new(CachePolicy::RefCounted);
    bundles.load(&a).unwrap();
    let loc = ResourceLocator::new(bundles).with_disk_root(&root);
    assert!(loc.open("x").unwrap().is_bundled());

    fs::remove_file(&a).unwrap();
    let err = loc.open("x").unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
    assert_eq!(loc.open_disk_files(), 0);
}

#[test]
fn read_failures_reach_the_caller() {
    let td = tempfile::tempdir().unwrap();
    let (a, _) = common::pack(td.path(), "a.blr", &[("x", b"bundled bytes")]);
    let bundles = Bundles::new(CachePolicy::None);
    bundles.load(&a).unwrap();
    let loc = ResourceLocator::new(bundles);
    let f = loc.open("x").unwrap();

    // cut the data region away after the index was read
    let header_only = fs::read(&a).unwrap()[..16].to_vec();
    fs::write(&a, header_only).unwrap();
    let err = f.read_to_vec().unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
