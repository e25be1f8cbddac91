use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::CliResult;

pub const OUTPUT_DIR_ENV: &str = "XLSFORM_OUTPUT_DIR";
pub const ALLOWED_ROOTS_ENV: &str = "XLSFORM_ALLOWED_ROOTS";

/// Picks the bundle root: the `--out` flag, then `XLSFORM_OUTPUT_DIR`, then the
/// working directory.
pub fn resolve_output_root(out: Option<PathBuf>) -> CliResult<PathBuf> {
    let candidate = match out {
        Some(path) => path,
        None => env::var_os(OUTPUT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    if candidate.as_os_str().is_empty() {
        return Err("output directory cannot be empty".into());
    }
    ensure_allowed_root(&candidate)?;
    Ok(candidate)
}

/// Rejects `target` when `XLSFORM_ALLOWED_ROOTS` is set and the path is not
/// under one of its roots.
pub fn ensure_allowed_root(target: &Path) -> CliResult<()> {
    WritePolicy::from_value(env::var_os(ALLOWED_ROOTS_ENV)).permits(target)
}

/// Writes `contents` to `path` after the root check, refusing to replace an
/// existing file unless `force` is set.
pub fn write_output(path: &Path, contents: &[u8], force: bool) -> CliResult<()> {
    ensure_allowed_root(path)?;
    if path.exists() && !force {
        return Err(format!(
            "{} already exists; rerun with --force to overwrite",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    log::debug!("wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Where output may go: anywhere writable, or only below the configured roots.
#[derive(Debug, PartialEq)]
enum WritePolicy {
    Writable,
    Confined(Vec<PathBuf>),
}

impl WritePolicy {
    fn from_value(value: Option<OsString>) -> Self {
        let Some(value) = value else {
            return WritePolicy::Writable;
        };
        let roots = env::split_paths(&value)
            .filter(|root| !root.as_os_str().is_empty())
            .map(|root| root.canonicalize().unwrap_or(root))
            .collect::<Vec<_>>();
        if roots.is_empty() {
            WritePolicy::Writable
        } else {
            WritePolicy::Confined(roots)
        }
    }

    fn permits(&self, target: &Path) -> CliResult<()> {
        let target = resolve_target(target)?;
        match self {
            WritePolicy::Confined(roots) if roots.iter().any(|root| target.starts_with(root)) => Ok(()),
            WritePolicy::Confined(roots) => Err(format!(
                "'{}' is outside {} ({})",
                target.display(),
                ALLOWED_ROOTS_ENV,
                roots
                    .iter()
                    .map(|root| root.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
            .into()),
            WritePolicy::Writable if nearest_existing(&target).is_some_and(is_writable) => Ok(()),
            WritePolicy::Writable => Err(format!("'{}' is not writable", target.display()).into()),
        }
    }
}

/// Absolute form of `path` with every existing ancestor canonicalized, so
/// symlinked roots compare equal and `..` cannot escape them.
fn resolve_target(path: &Path) -> CliResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    let Some(existing) = nearest_existing(&absolute) else {
        return Ok(absolute);
    };
    let mut resolved = existing.canonicalize()?;
    if let Ok(rest) = absolute.strip_prefix(existing) {
        for component in rest.components() {
            match component {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                other => resolved.push(other),
            }
        }
    }
    Ok(resolved)
}

fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|ancestor| ancestor.exists())
}

fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| !metadata.permissions().readonly())
        .unwrap_or(false)
}
