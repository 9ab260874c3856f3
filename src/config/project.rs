//! Project files: a filter tree described in TOML.
//!
//! ```toml
//! name = "Lattice demo"
//!
//! [[filters]]
//! id = "load"
//! kind = "DataLoad"
//! properties = { count = 4096, masses = "1.0,2.0" }
//!
//! [[filters]]
//! id = "spectrum"
//! parent = "load"
//! kind = "SpectrumPlot"
//! properties = { bin_width = 0.05 }
//! ```
//!
//! Entries are created in file order, so a parent must be declared before its
//! children.

use crate::error::{EngineError, Result};
use crate::pipeline::factory::FilterFactory;
use crate::pipeline::filter::{FilterBehavior, FilterKind, PropertyValue};
use crate::pipeline::id::FilterId;
use crate::pipeline::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Project file extension
pub const PROJECT_FILE_EXTENSION: &str = "toml";

/// One filter entry of a project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFilter {
    /// Key other entries use to name this one as parent
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub kind: FilterKind,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Project file format version for future compatibility
    #[serde(default = "default_project_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub filters: Vec<ProjectFilter>,
}

fn default_project_version() -> u32 {
    1
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            version: 1,
            name: "Untitled Project".to_string(),
            filters: Vec::new(),
        }
    }
}

impl ProjectFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a project file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Project(format!("Failed to read project file {:?}: {}", path, e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save project file to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::Project(format!("Failed to write project file {:?}: {}", path, e))
        })
    }

    /// Describe `tree`. Plugin filters cannot be recreated from a file and
    /// are left out together with their subtrees.
    pub fn from_tree(name: impl Into<String>, tree: &FilterTree) -> Self {
        let mut filters = Vec::new();
        let mut skipped = Vec::new();
        for id in tree.depth_first() {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let parent = tree.parent(id);
            if filter.kind() == FilterKind::External
                || parent.is_some_and(|p| skipped.contains(&p))
            {
                skipped.push(id);
                continue;
            }
            filters.push(ProjectFilter {
                id: format!("f{}", id.0),
                parent: parent.map(|p| format!("f{}", p.0)),
                kind: filter.kind(),
                properties: filter.properties().into_iter().collect(),
            });
        }
        if !skipped.is_empty() {
            tracing::warn!("{} plugin filters not written to project", skipped.len());
        }
        Self {
            name: name.into(),
            filters,
            ..Default::default()
        }
    }

    /// Build the filter tree. Returns the tree and the id each entry key
    /// was given.
    pub fn build_tree(&self) -> Result<(FilterTree, HashMap<String, FilterId>)> {
        let mut tree = FilterTree::new();
        let mut ids: HashMap<String, FilterId> = HashMap::new();

        for entry in &self.filters {
            if ids.contains_key(&entry.id) {
                return Err(EngineError::Project(format!(
                    "duplicate filter id '{}'",
                    entry.id
                )));
            }
            let parent = match &entry.parent {
                Some(key) => Some(*ids.get(key).ok_or_else(|| {
                    EngineError::Project(format!(
                        "filter '{}' names unknown parent '{}'",
                        entry.id, key
                    ))
                })?),
                None => None,
            };
            let filter = FilterFactory::create_with_properties(
                entry.kind,
                entry.properties.iter().map(|(k, v)| (k.as_str(), v)),
            )
            .map_err(|e| EngineError::Project(format!("filter '{}': {}", entry.id, e)))?;
            let id = tree.add_filter(parent, filter)?;
            ids.insert(entry.id.clone(), id);
        }

        tracing::info!(
            "Built project '{}' with {} filters",
            self.name,
            tree.len()
        );
        Ok((tree, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        name = "sample"

        [[filters]]
        id = "load"
        kind = "DataLoad"

        [[filters]]
        id = "range"
        parent = "load"
        kind = "RangeFile"
        properties = { ranges = "A:0.5-1.5,B:1.5-2.5" }

        [[filters]]
        id = "profile"
        parent = "range"
        kind = "CompositionProfile"
        properties = { axis = 0, bin_width = 2.0 }
    "#;

    #[test]
    fn test_build_tree_links_parents() {
        let project = ProjectFile::parse(SAMPLE).unwrap();
        let (tree, ids) = project.build_tree().unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.parent(ids["profile"]), Some(ids["range"]));
        assert_eq!(tree.roots(), &[ids["load"]]);
    }

    #[test]
    fn test_unknown_parent_and_duplicates_are_rejected() {
        let mut project = ProjectFile::parse(SAMPLE).unwrap();
        project.filters[1].parent = Some("missing".into());
        assert!(matches!(project.build_tree(), Err(EngineError::Project(_))));

        let mut project = ProjectFile::parse(SAMPLE).unwrap();
        project.filters[2].id = "range".into();
        assert!(matches!(project.build_tree(), Err(EngineError::Project(_))));
    }

    #[test]
    fn test_bad_property_is_reported_with_entry() {
        let mut project = ProjectFile::parse(SAMPLE).unwrap();
        project.filters[2]
            .properties
            .insert("axis".into(), PropertyValue::Int(7));
        let err = project.build_tree().unwrap_err();
        assert!(err.to_string().contains("profile"));
    }

    #[test]
    fn test_tree_round_trip_through_file() {
        let (tree, _) = ProjectFile::parse(SAMPLE).unwrap().build_tree().unwrap();
        let saved = ProjectFile::from_tree("copy", &tree);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.toml");
        saved.save(&path).unwrap();
        let loaded = ProjectFile::load(&path).unwrap();
        assert_eq!(loaded, saved);

        let (rebuilt, _) = loaded.build_tree().unwrap();
        assert_eq!(rebuilt.len(), tree.len());
        for (a, b) in tree.depth_first().into_iter().zip(rebuilt.depth_first()) {
            assert_eq!(
                tree.filter(a).unwrap().properties(),
                rebuilt.filter(b).unwrap().properties()
            );
        }
    }
}
