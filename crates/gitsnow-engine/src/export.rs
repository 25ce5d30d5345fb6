//! Snapshot export to the scripts directory layout

use gitsnow_catalog::DatabaseSnapshot;
use gitsnow_core::{Diagnostic, DiagnosticCode, Location, ObjectKind, ObjectName};
use gitsnow_sql::SqlFormatter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One written file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub object: ObjectName,
    pub kind: ObjectKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Export {
    pub written: Vec<ExportedFile>,
    pub diagnostics: Vec<Diagnostic>,
}

/// `<root>/<schema>/<kind directory>/<name>.sql`, lower-cased.
///
/// `overload_index` counts from 1; the second overload and later get `<name>.<n>.sql`.
pub fn export_path(root: &Path, name: &ObjectName, kind: ObjectKind, overload_index: usize) -> PathBuf {
    let file_name = if overload_index > 1 {
        format!("{}.{}.sql", name.name().to_lowercase(), overload_index)
    } else {
        format!("{}.sql", name.name().to_lowercase())
    };

    root.join(name.schema().to_lowercase())
        .join(kind.directory())
        .join(file_name)
}

/// Write every snapshot object's formatted DDL under `root`.
///
/// DDL that cannot be formatted is written as captured.
pub fn export_snapshot(
    snapshot: &DatabaseSnapshot,
    root: &Path,
    formatter: &SqlFormatter,
) -> Result<Export, ExportError> {
    let mut export = Export::default();
    let mut overloads: HashMap<&ObjectName, usize> = HashMap::new();

    for object in snapshot.iter() {
        let index = overloads.entry(&object.name).or_insert(0);
        *index += 1;
        let path = export_path(root, &object.name, object.kind, *index);

        let text = match formatter.format(&object.ddl) {
            Ok(formatted) => formatted,
            Err(e) => {
                warn!(object = %object.name, error = %e, "Writing unformatted DDL");
                export.diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::Warning,
                        format!("Could not format DDL of {} ({}); written as captured", object.name, e),
                    )
                    .with_object(object.name.to_string())
                    .with_location(Location::new(path.display().to_string())),
                );
                object.ddl.trim().to_string()
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, format!("{}\n", text)).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Exported");

        export.written.push(ExportedFile {
            object: object.name.clone(),
            kind: object.kind,
            path,
        });
    }

    Ok(export)
}
