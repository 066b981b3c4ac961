//! Release pipeline: source image in, databases and rule-sets out.

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aggregate::LabelledNetworks;
use crate::config::ReleaseConfig;
use crate::mmdb::{Tree, TreeOptions, Value};
use crate::source::{CountryRecord, SourceDatabase};
use crate::srs::emit_rule_set;
use crate::{Error, Result};

/// What a release run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Number of distinct labels
    pub labels: usize,
    /// Number of labelled networks
    pub networks: usize,
    /// Number of networks without a label
    pub skipped: usize,
    /// Database files written
    pub databases: Vec<PathBuf>,
    /// Rule-set files written
    pub rule_sets: Vec<PathBuf>,
}

/// Insert the networks of the allowed labels into `tree`.
///
/// An empty `allow` list allows every label. Labels are visited in
/// sorted order. Returns the number of inserted networks.
pub fn insert_labels(tree: &mut Tree, networks: &LabelledNetworks, allow: &[String]) -> Result<usize> {
    let mut inserted = 0usize;
    for (label, nets) in networks.iter() {
        if !allow.is_empty() && !allow.iter().any(|a| a == label) {
            continue;
        }
        for net in nets {
            tree.insert(*net, Value::from(label))?;
        }
        inserted += nets.len();
    }
    Ok(inserted)
}

/// Insert the allowed labels and serialize the tree to `sink`.
///
/// Returns the number of bytes written.
pub fn write_labels<W: Write>(
    tree: &mut Tree,
    networks: &LabelledNetworks,
    allow: &[String],
    sink: W,
) -> Result<usize> {
    let inserted = insert_labels(tree, networks, allow)?;
    debug!("inserted {} networks", inserted);
    tree.write_to(sink)
}

/// Run the whole pipeline on a source database image.
pub fn release(config: &ReleaseConfig, source: Vec<u8>) -> Result<ReleaseSummary> {
    config.validate()?;

    let source = SourceDatabase::from_bytes(source)?;
    let metadata = source.metadata().clone();
    info!(
        "Source database: {} (IPv{}, {}-bit records, {} nodes)",
        metadata.database_type, metadata.ip_version, metadata.record_size, metadata.node_count
    );

    let networks = LabelledNetworks::collect(source.networks::<CountryRecord>()?)?;
    let labels = networks.labels();

    let mut summary = ReleaseSummary {
        labels: networks.len(),
        networks: networks.network_count(),
        skipped: networks.skipped(),
        ..ReleaseSummary::default()
    };

    let mut full = Tree::new(TreeOptions::geoip(&metadata, &labels))?;
    write_database(&mut full, &networks, &[], &config.output, config.checksums)?;
    summary.databases.push(config.output.clone());

    let mut filtered = if config.append && config.filtered_output.exists() {
        Tree::load(&config.filtered_output, &config.filtered_labels)?
    } else {
        Tree::new(TreeOptions::geoip(&metadata, &config.filtered_labels))?
    };
    write_database(
        &mut filtered,
        &networks,
        &config.filtered_labels,
        &config.filtered_output,
        config.checksums,
    )?;
    summary.databases.push(config.filtered_output.clone());

    reset_dir(&config.rule_set_dir)?;
    for (label, nets) in networks.iter() {
        let path = emit_rule_set(&config.rule_set_dir, label, nets, config.json)?;
        summary.rule_sets.push(path);
    }

    info!(
        "Release done: {} labels, {} networks, {} rule-sets",
        summary.labels,
        summary.networks,
        summary.rule_sets.len()
    );
    Ok(summary)
}

/// Serialize `tree` with the allowed labels to `path`.
fn write_database(
    tree: &mut Tree,
    networks: &LabelledNetworks,
    allow: &[String],
    path: &Path,
    checksum: bool,
) -> Result<()> {
    let mut image = Vec::new();
    write_labels(tree, networks, allow, &mut image)?;
    fs::write(path, &image).map_err(Error::Write)?;
    info!("Wrote {} ({} bytes)", path.display(), image.len());

    if checksum {
        let sum_path = write_checksum(path, &image)?;
        debug!("wrote {}", sum_path.display());
    }
    Ok(())
}

/// Write `<path>.sha256sum` in `sha256sum` format.
pub fn write_checksum(path: &Path, content: &[u8]) -> Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?;

    let mut sum_path = path.as_os_str().to_owned();
    sum_path.push(".sha256sum");
    let sum_path = PathBuf::from(sum_path);

    let line = format!("{:x}  {}\n", Sha256::digest(content), name);
    fs::write(&sum_path, line).map_err(Error::Write)?;
    Ok(sum_path)
}

/// Remove `dir` with everything in it and create it again.
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(Error::Write)?;
    }
    fs::create_dir_all(dir).map_err(Error::Write)?;
    Ok(())
}

/// Format a GitHub Actions output line.
pub fn action_output(name: &str, content: &str) -> String {
    format!("::set-output name={}::{}", name, content)
}

/// Print a GitHub Actions output line to stdout.
pub fn set_action_output(name: &str, content: &str) {
    println!("{}", action_output(name, content));
}
