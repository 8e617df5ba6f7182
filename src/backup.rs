use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/enroll.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "enroll-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(db::DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut db_bytes = Vec::new();
    File::open(&db_path)
        .and_then(|mut f| f.read_to_end(&mut db_bytes))
        .with_context(|| format!("failed to read {}", db_path.to_string_lossy()))?;

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "dbSha256": sha256_hex(&db_bytes),
    });

    zip.start_file(MANIFEST_ENTRY, opts)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    zip.start_file(DB_ENTRY, opts)?;
    zip.write_all(&db_bytes)?;

    zip.start_file(META_WORKSPACE_ENTRY, opts)?;
    zip.write_all(
        serde_json::to_string_pretty(&json!({
            "workspacePath": workspace_path.to_string_lossy(),
        }))?
        .as_bytes(),
    )?;

    zip.finish()?;
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
    })
}

pub fn import_workspace_bundle(
    bundle_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let file = File::open(bundle_path).with_context(|| {
        format!("failed to open bundle {}", bundle_path.to_string_lossy())
    })?;
    let mut archive = ZipArchive::new(file)?;

    let mut manifest_raw = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| anyhow!("bundle has no manifest"))?
        .read_to_string(&mut manifest_raw)?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest_raw)
        .map_err(|e| anyhow!("bundle manifest is not valid JSON: {}", e))?;

    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {:?}", format));
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .map_err(|_| anyhow!("bundle has no database entry"))?
        .read_to_end(&mut db_bytes)?;

    if let Some(expected) = manifest.get("dbSha256").and_then(|v| v.as_str()) {
        let actual = sha256_hex(&db_bytes);
        if actual != expected {
            return Err(anyhow!(
                "database checksum mismatch: expected {}, got {}",
                expected,
                actual
            ));
        }
    }

    std::fs::create_dir_all(workspace_path)?;
    let db_path = workspace_path.join(db::DB_FILE);
    let mut out = File::create(&db_path)
        .with_context(|| format!("failed to write {}", db_path.to_string_lossy()))?;
    out.write_all(&db_bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: format,
    })
}
