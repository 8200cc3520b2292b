//! JSON dataset import
//!
//! Scans a directory for dataset files of the form
//! `{"items": [...], "recipes": [...], "limitations": {...}}`, merges them
//! in path order and stores the result. Later files replace items and
//! recipes with the same id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db;
use crate::models::{Dataset, Item, Recipe};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatasetFile {
    pub items: Vec<Item>,
    pub recipes: Vec<Recipe>,
    pub limitations: BTreeMap<String, BTreeSet<String>>,
}

impl DatasetFile {
    fn is_empty(&self) -> bool {
        self.items.is_empty() && self.recipes.is_empty() && self.limitations.is_empty()
    }
}

/// Find all *.json files below `dir`, sorted by path
pub fn find_dataset_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Parse a single dataset file. Files with no items, recipes or
/// limitations are not datasets and yield `None`.
pub fn parse_dataset_file(path: &Path) -> Result<Option<DatasetFile>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: DatasetFile =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    if file.is_empty() {
        return Ok(None);
    }
    Ok(Some(file))
}

/// Merge `file` into `items`/`recipes`/`limitations`, replacing entries by id.
fn merge(
    file: DatasetFile,
    items: &mut Vec<Item>,
    recipes: &mut Vec<Recipe>,
    limitations: &mut BTreeMap<String, BTreeSet<String>>,
) {
    for item in file.items {
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }
    for recipe in file.recipes {
        match recipes.iter_mut().find(|r| r.id == recipe.id) {
            Some(existing) => *existing = recipe,
            None => recipes.push(recipe),
        }
    }
    for (name, ids) in file.limitations {
        limitations.entry(name).or_default().extend(ids);
    }
}

/// Import all dataset files below `dir` and store the merged dataset.
///
/// Unless `clear` is set the files are merged on top of what is already
/// stored. The merged dataset must validate before anything is written.
pub fn import_to_database(conn: &mut Connection, dir: &Path, clear: bool) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    let base = if clear { Dataset::default() } else { db::load_dataset(conn)? };
    let mut items = base.items;
    let mut recipes = base.recipes;
    let mut limitations = base.limitations;

    info!(dir = %dir.display(), "scanning for dataset files");
    let files = find_dataset_files(dir)?;
    debug!(files = files.len(), "found candidate files");

    for path in &files {
        match parse_dataset_file(path) {
            Ok(Some(file)) => {
                debug!(
                    path = %path.display(),
                    items = file.items.len(),
                    recipes = file.recipes.len(),
                    "parsed dataset file"
                );
                stats.files += 1;
                stats.items += file.items.len();
                stats.recipes += file.recipes.len();
                merge(file, &mut items, &mut recipes, &mut limitations);
            }
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable dataset file");
                stats.errors += 1;
            }
        }
    }

    let dataset = Dataset::new(items, recipes, limitations);
    dataset.validate().context("Imported dataset is inconsistent")?;
    db::save_dataset(conn, &dataset)?;

    Ok(stats)
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub files: usize,
    pub items: usize,
    pub recipes: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Imported {} files ({} items, {} recipes). Skipped: {}, Errors: {}",
            self.files, self.items, self.recipes, self.skipped, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MACHINES: &str = r#"{
        "items": [
            { "id": "furnace", "name": "Furnace", "machine": { "speed": "1/2", "usage": 90 } },
            { "id": "iron-ore", "name": "Iron ore" },
            { "id": "iron-plate", "name": "Iron plate", "stack": 100 }
        ]
    }"#;

    const RECIPES: &str = r#"{
        "recipes": [
            {
                "id": "iron-plate", "name": "Iron plate", "time": 3.2,
                "in": { "iron-ore": 1 }, "out": { "iron-plate": 1 },
                "producers": ["furnace"]
            }
        ]
    }"#;

    #[test]
    fn imports_and_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_items.json"), MACHINES).unwrap();
        fs::create_dir(dir.path().join("more")).unwrap();
        fs::write(dir.path().join("more").join("recipes.json"), RECIPES).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a dataset").unwrap();
        fs::write(dir.path().join("settings.json"), r#"{"paused": true}"#).unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let stats = import_to_database(&mut conn, dir.path(), true).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.items, 3);
        assert_eq!(stats.recipes, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 1);

        let dataset = db::load_dataset(&conn).unwrap();
        assert_eq!(dataset.recipe("iron-plate").unwrap().time.to_string(), "3.2");
        assert_eq!(dataset.machine("furnace").unwrap().speed.as_ref().unwrap().to_string(), "0.5");
    }

    #[test]
    fn inconsistent_datasets_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("recipes.json"), RECIPES).unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        assert!(import_to_database(&mut conn, dir.path(), true).is_err());
        assert!(db::list_recipes(&conn).unwrap().is_empty());
    }

    #[test]
    fn later_files_replace_by_id() {
        let mut items = vec![Item::new("a", "Old")];
        let mut recipes = Vec::new();
        let mut limitations = BTreeMap::new();
        let file = DatasetFile {
            items: vec![Item::new("a", "New"), Item::new("b", "B")],
            ..DatasetFile::default()
        };
        merge(file, &mut items, &mut recipes, &mut limitations);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "New");
    }
}
