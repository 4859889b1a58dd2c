//! Contains the [FixtureCollector], which groups filled fixtures by module and writes them out.

use crate::{error::CollectError, fixture::FixtureRecord};
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Collects [FixtureRecord]s per module until they are flushed to disk.
#[derive(Debug, Default)]
pub(crate) struct FixtureCollector {
    /// The root of the fixture output tree.
    output_dir: PathBuf,
    /// Whether to drop the filler directory structure from the output paths.
    flat_output: bool,
    modules: HashMap<String, ModuleFixtures>,
    /// The module each written file belongs to.
    written: HashMap<PathBuf, String>,
}

/// The records of one module, in insertion order.
#[derive(Debug, Default)]
struct ModuleFixtures {
    entries: Vec<(String, FixtureRecord)>,
    names: HashSet<String>,
}

/// A module's fixtures, serialized as one JSON object.
struct FixtureDocument<'a>(&'a [(String, FixtureRecord)]);

impl Serialize for FixtureDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, (display_name, record)) in self.0.iter().enumerate() {
            map.serialize_entry(&document_key(index, display_name, record), record)?;
        }
        map.end()
    }
}

/// The key of a record within its module document: `NNN-display[-internal]`.
fn document_key(index: usize, display_name: &str, record: &FixtureRecord) -> String {
    match &record.name {
        Some(name) => format!("{index:03}-{display_name}-{name}"),
        None => format!("{index:03}-{display_name}"),
    }
}

impl FixtureCollector {
    pub(crate) fn new(output_dir: PathBuf, flat_output: bool) -> Self {
        Self {
            output_dir,
            flat_output,
            modules: HashMap::new(),
            written: HashMap::new(),
        }
    }

    /// Records a fixture under `module`.
    ///
    /// Fails if the module already holds a fixture with the same document key.
    pub(crate) fn add(
        &mut self,
        module: &str,
        display_name: &str,
        record: FixtureRecord,
    ) -> Result<(), CollectError> {
        let fixtures = self.modules.entry(module.to_string()).or_default();
        let name = match &record.name {
            Some(internal) => format!("{display_name}-{internal}"),
            None => display_name.to_string(),
        };
        if !fixtures.names.insert(name.clone()) {
            return Err(CollectError::DuplicateFixtureName {
                module: module.to_string(),
                name,
            });
        }
        fixtures.entries.push((display_name.to_string(), record));
        Ok(())
    }

    /// Writes the fixtures collected for `module` and releases them.
    ///
    /// A later flush of the same module overwrites the file with whatever was added since. A
    /// different module resolving to an already written file is rejected.
    pub(crate) fn flush(&mut self, module: &str) -> Result<PathBuf, CollectError> {
        let path = self.module_path(module);
        if let Some(owner) = self.written.get(&path).filter(|owner| *owner != module) {
            return Err(CollectError::PathCollision {
                module: module.to_string(),
                other: owner.clone(),
                path,
            });
        }
        let fixtures = self
            .modules
            .remove(module)
            .ok_or_else(|| CollectError::UnknownModule(module.to_string()))?;

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        FixtureDocument(&fixtures.entries).serialize(&mut serializer)?;
        buf.push(b'\n');

        let io_err = |source| CollectError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, buf).map_err(io_err)?;
        self.written.insert(path.clone(), module.to_string());

        debug!(
            target: "collector",
            "Wrote {} fixture(s) to {}",
            fixtures.entries.len(),
            path.display()
        );
        Ok(path)
    }

    /// The file a module's fixtures are written to. The extension is appended, so dots in a
    /// module id are kept.
    pub(crate) fn module_path(&self, module: &str) -> PathBuf {
        let mut relative = if self.flat_output {
            Path::new(module)
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| module.into())
        } else {
            module.into()
        };
        relative.push(".json");
        self.output_dir.join(relative)
    }

    /// The output root.
    pub(crate) fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
