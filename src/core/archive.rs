//! Deployment archive handling: resolve sources, build the ZIP, transfer it
//! and drive remote extraction.

use crate::error::{Error, Result};
use crate::runner;
use crate::ssh::{DebugSink, RemoteExec};
use crate::utils::shell;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Fixed archive file name, used locally and on the remote host.
pub const ARCHIVE_NAME: &str = "deploy.zip";

/// One resolved source item: where it lives locally and the relative name
/// it gets inside the archive.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Expand the configured glob patterns against the project directory.
///
/// Entry names are relative to the project directory, never absolute, so the
/// same archive extracts into an arbitrary remote target directory.
pub fn resolve_sources(sources: &[String], base_dir: &Path) -> Result<ArchiveManifest> {
    let mut entries = Vec::new();

    for pattern in sources {
        let full_pattern = base_dir.join(pattern);
        let matches = glob::glob(&full_pattern.to_string_lossy()).map_err(|e| {
            Error::archive_build_failed(format!("invalid source pattern '{}': {}", pattern, e))
        })?;

        for item in matches {
            let path = item.map_err(|e| {
                Error::archive_build_failed(format!("source scan failed for '{}': {}", pattern, e))
            })?;
            let name = relative_entry_name(&path, base_dir)?;
            // A stale archive from an aborted run must not nest into the new one
            if name == ARCHIVE_NAME {
                continue;
            }
            entries.push(ManifestEntry { path, name });
        }
    }

    log_status!("sources", "Found {} source items", entries.len());
    Ok(ArchiveManifest { entries })
}

fn relative_entry_name(path: &Path, base_dir: &Path) -> Result<String> {
    let relative = path.strip_prefix(base_dir).map_err(|_| {
        Error::archive_build_failed(format!(
            "source {} is outside the project directory {}",
            path.display(),
            base_dir.display()
        ))
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Write the deployment ZIP into the project directory and return its path.
/// Directories recurse under their relative name; files are added one by one
/// with the same relative-naming rule.
pub fn build(manifest: &ArchiveManifest, base_dir: &Path) -> Result<PathBuf> {
    log_status!("archive", "Creating deployment archive...");

    let archive_path = base_dir.join(ARCHIVE_NAME);
    let file = File::create(&archive_path).map_err(|e| {
        Error::archive_build_failed(format!("cannot write {}: {}", archive_path.display(), e))
    })?;

    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    for entry in &manifest.entries {
        if entry.path.is_dir() {
            add_directory(&mut zip, &entry.path, &entry.name, options)?;
        } else {
            add_file(&mut zip, &entry.path, &entry.name, options)?;
        }
    }

    zip.finish()
        .map_err(|e| Error::archive_build_failed(e.to_string()))?;

    log_status!("archive", "Deployment package created");
    Ok(archive_path)
}

fn add_file(
    zip: &mut zip::ZipWriter<File>,
    path: &Path,
    name: &str,
    options: zip::write::FileOptions,
) -> Result<()> {
    zip.start_file(name, options)
        .map_err(|e| Error::archive_build_failed(e.to_string()))?;

    let mut source = File::open(path).map_err(|e| {
        Error::archive_build_failed(format!("cannot read {}: {}", path.display(), e))
    })?;
    let mut buf = Vec::new();
    source.read_to_end(&mut buf).map_err(|e| {
        Error::archive_build_failed(format!("cannot read {}: {}", path.display(), e))
    })?;

    use std::io::Write;
    zip.write_all(&buf)
        .map_err(|e| Error::archive_build_failed(e.to_string()))?;
    Ok(())
}

fn add_directory(
    zip: &mut zip::ZipWriter<File>,
    dir: &Path,
    name: &str,
    options: zip::write::FileOptions,
) -> Result<()> {
    zip.add_directory(format!("{}/", name), options)
        .map_err(|e| Error::archive_build_failed(e.to_string()))?;

    let reader = std::fs::read_dir(dir).map_err(|e| {
        Error::archive_build_failed(format!("cannot list {}: {}", dir.display(), e))
    })?;

    for entry in reader {
        let entry =
            entry.map_err(|e| Error::archive_build_failed(format!("cannot list entry: {}", e)))?;
        let path = entry.path();
        let child_name = format!("{}/{}", name, entry.file_name().to_string_lossy());

        if path.is_dir() {
            add_directory(zip, &path, &child_name, options)?;
        } else {
            add_file(zip, &path, &child_name, options)?;
        }
    }

    Ok(())
}

/// Transfer the archive into the target directory as a single unit.
pub fn upload(
    exec: &dyn RemoteExec,
    local_path: &Path,
    target_dir: &str,
    sink: &DebugSink,
) -> Result<String> {
    let remote_path = format!("{}/{}", target_dir, ARCHIVE_NAME);
    log_status!("archive", "Uploading {} to server...", local_path.display());
    exec.upload(local_path, &remote_path, sink)?;
    log_status!("archive", "Deployment package uploaded to '{}'", remote_path);
    Ok(remote_path)
}

/// Extract the uploaded archive in place and delete it from the remote host.
/// Overwrite is allowed so re-deploys succeed idempotently. Any failing step
/// aborts the whole deployment.
pub fn extract_and_cleanup(
    exec: &dyn RemoteExec,
    target_dir: &str,
    sink: &DebugSink,
) -> Result<()> {
    let remote_archive = format!("{}/{}", target_dir, ARCHIVE_NAME);
    let cmds = vec![
        format!("cd {}", shell::quote_path(target_dir)),
        format!("unzip -ao {}", shell::quote_path(&remote_archive)),
        format!("rm -f {}", ARCHIVE_NAME),
    ];
    runner::run_chain(exec, &cmds, sink)?;
    log_status!("archive", "Package unzipped on the target server");
    Ok(())
}

/// Delete the local archive after a successful run. Not guaranteed to happen
/// when the pipeline aborts earlier; that cleanup is best-effort only.
pub fn remove_local(archive_path: &Path) -> Result<()> {
    std::fs::remove_file(archive_path).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("remove {}", archive_path.display())),
        )
    })
}
