#![allow(dead_code)]

use bundlr_core::packer::{PackReport, Packer};
use std::path::{Path, PathBuf};

/// Write `files` under `dir/src` and pack them, in order, into `dir/name`.
pub fn pack(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> (PathBuf, PackReport) {
    let src = dir.join(format!("{name}.src"));
    let out = dir.join(name);
    let mut packer = Packer::new(&out);
    for (i, (rel, data)) in files.iter().enumerate() {
        let p = src.join(format!("{i}.bin"));
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(&p, data).unwrap();
        packer.add(rel, &p).unwrap();
    }
    let report = packer.pack().unwrap();
    (out, report)
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}
