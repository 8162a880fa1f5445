use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use bundlr_core::collect::collect_dir;
use bundlr_core::layout::{IndexEntry, Version};
use bundlr_core::packer::{PackReport, Packer};
use bundlr_core::{Bundle, BundleFile, CachePolicy, FileMeta};

const COPY_BUF: usize = 1 << 16;

#[derive(Parser)]
#[command(name = "bundlr", version, about = "Pack and inspect single-file bundles")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Pack every file under a directory into one bundle
    Pack {
        input: PathBuf,
        output: PathBuf,
        /// Glob matched against the relative path; repeatable
        #[arg(long)]
        exclude: Vec<String>,
        /// Write a JSON pack report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List the index of a bundle
    List {
        archive: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Extract one file from a bundle
    Cat {
        archive: PathBuf,
        path: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compare every file under a directory with its bundled copy
    Verify { archive: PathBuf, dir: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Cmd::Pack { input, output, exclude, report } => pack(&input, &output, &exclude, report.as_deref())?,
        Cmd::List { archive, json } => list(&archive, json)?,
        Cmd::Cat { archive, path, out } => cat(&archive, &path, out.as_deref())?,
        Cmd::Verify { archive, dir } => verify(&archive, &dir)?,
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

#[derive(Serialize)]
struct ReportFile<'a> {
    created_utc: String,
    #[serde(flatten)]
    report: &'a PackReport,
}

fn pack(input: &Path, output: &Path, excludes: &[String], report_path: Option<&Path>) -> Result<()> {
    let mut packer = Packer::new(output);
    let n = packer.add_dir(input, excludes).with_context(|| format!("collect {}", input.display()))?;
    let report = packer.pack().with_context(|| format!("pack {}", output.display()))?;
    eprintln!("Packed {} file(s) into {} ({} bytes)", n, output.display(), report.total_bytes);

    if let Some(rp) = report_path {
        let doc = ReportFile { created_utc: chrono::Utc::now().to_rfc3339(), report: &report };
        let mut w = BufWriter::new(File::create(rp).with_context(|| format!("create {}", rp.display()))?);
        serde_json::to_writer_pretty(&mut w, &doc).with_context(|| format!("write {}", rp.display()))?;
        w.flush()?;
    }
    Ok(())
}

#[derive(Serialize)]
struct Listing {
    version: Version,
    data_start_offset: u64,
    entries: Vec<IndexEntry>,
}

fn open_bundle(archive: &Path) -> Result<Bundle> {
    Bundle::open_with(archive, CachePolicy::AlwaysCached).with_context(|| format!("open {}", archive.display()))
}

fn list(archive: &Path, json: bool) -> Result<()> {
    let bundle = open_bundle(archive)?;
    let entries: Vec<IndexEntry> = bundle
        .entries()
        .into_iter()
        .map(|m| IndexEntry { path: m.relative_path().to_string(), pos: m.pos(), size: m.size() })
        .collect();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let listing = Listing { version: bundle.version(), data_start_offset: bundle.data_start_offset(), entries };
        serde_json::to_writer_pretty(&mut out, &listing)?;
        writeln!(out)?;
    } else {
        eprintln!("{} {}: {} file(s), data at {}", archive.display(), bundle.version(), entries.len(), bundle.data_start_offset());
        for e in &entries {
            writeln!(out, "{:>12} {:>12}  {}", e.pos, e.size, e.path)?;
        }
    }
    Ok(())
}

/// Stream the whole of `meta` through `sink` in fixed-size pieces.
fn copy_out(bundle: &Bundle, meta: &FileMeta, mut sink: impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
    let mut buf = vec![0u8; COPY_BUF];
    let mut off = 0u64;
    while off < meta.size() {
        let n = (meta.size() - off).min(COPY_BUF as u64) as usize;
        bundle.read(meta, &mut buf, 0, off, n)?;
        sink(&buf[..n])?;
        off += n as u64;
    }
    Ok(())
}

fn cat(archive: &Path, rel: &str, out: Option<&Path>) -> Result<()> {
    let bundle = Arc::new(open_bundle(archive)?);
    let file = BundleFile::open(bundle.clone(), rel).with_context(|| format!("'{}' in {}", rel, archive.display()))?;
    match out {
        Some(p) => {
            let mut w = BufWriter::new(File::create(p).with_context(|| format!("create {}", p.display()))?);
            copy_out(&bundle, file.metadata(), |b| Ok(w.write_all(b)?))?;
            w.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut w = stdout.lock();
            copy_out(&bundle, file.metadata(), |b| Ok(w.write_all(b)?))?;
            w.flush()?;
        }
    }
    file.close();
    Ok(())
}

fn hash_disk(path: &Path) -> Result<blake3::Hash> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut h = blake3::Hasher::new();
    io::copy(&mut f, &mut h).with_context(|| format!("read {}", path.display()))?;
    Ok(h.finalize())
}

fn hash_bundled(bundle: &Bundle, meta: &FileMeta) -> Result<blake3::Hash> {
    let mut h = blake3::Hasher::new();
    copy_out(bundle, meta, |b| {
        h.update(b);
        Ok(())
    })?;
    Ok(h.finalize())
}

fn verify(archive: &Path, dir: &Path) -> Result<()> {
    let bundle = open_bundle(archive)?;
    let files = collect_dir(dir, &[]).with_context(|| format!("collect {}", dir.display()))?;
    let mut problems: Vec<String> = files
        .par_iter()
        .map(|c| -> Result<Option<String>> {
            let Some(meta) = bundle.get_metadata(&c.rel_path) else {
                return Ok(Some(format!("MISSING {}", c.rel_path)));
            };
            if meta.size() != std::fs::metadata(&c.source)?.len() {
                return Ok(Some(format!("SIZE {}", c.rel_path)));
            }
            debug!("hashing {}", c.rel_path);
            if hash_disk(&c.source)? != hash_bundled(&bundle, &meta)? {
                return Ok(Some(format!("MISMATCH {}", c.rel_path)));
            }
            Ok(None)
        })
        .filter_map(|r| r.transpose())
        .collect::<Result<Vec<_>>>()?;
    problems.sort();

    eprintln!("Checked {} file(s) against {}", files.len(), archive.display());
    if problems.is_empty() {
        println!("OK");
        return Ok(());
    }
    for p in &problems {
        println!("{}", p);
    }
    Err(anyhow!("{} file(s) differ from {}", problems.len(), archive.display()))
}
