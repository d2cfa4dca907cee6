//! Environment file and baseline database handling

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Write the environment file verbatim; returns whether its content changed
pub fn write_env_file(path: &Path, content: &str) -> io::Result<bool> {
    match fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content.as_bytes())?;
    tracing::info!("Wrote environment file {:?}", path);
    Ok(true)
}

/// What happened to the baseline database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseSync {
    /// Copied from the template because none existed
    Seeded,
    /// Replaced from the template on request
    Overwritten,
    /// An existing database was left alone
    Kept,
    /// No template is available
    NoTemplate,
}

/// Seed `dest` from `template`, never replacing an existing file unless `overwrite`
pub fn sync_database(
    template: Option<&Path>,
    dest: &Path,
    overwrite: bool,
) -> io::Result<DatabaseSync> {
    let exists = dest.exists();
    if exists && !overwrite {
        return Ok(DatabaseSync::Kept);
    }

    let template = match template.filter(|t| t.is_file()) {
        Some(t) => t,
        None => {
            if template.is_some() {
                tracing::warn!("Database template {:?} not found", template);
            }
            return Ok(if exists {
                DatabaseSync::Kept
            } else {
                DatabaseSync::NoTemplate
            });
        }
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(template, dest)?;

    if exists {
        tracing::info!("Overwrote database {:?} from template", dest);
        Ok(DatabaseSync::Overwritten)
    } else {
        tracing::info!("Seeded database {:?} from template", dest);
        Ok(DatabaseSync::Seeded)
    }
}
