//! Scenario Catalog
//!
//! Loads the skills and their scenarios from a directory of `<skill>.json` files,
//! each mapping a scenario id to its fields. The loaded catalog is cached for the
//! lifetime of the store.

use crate::scenario::{Scenario, Skill};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Failed to read scenario catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scenario source unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the catalog of skills and scenarios.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    /// Lists every skill that has at least one playable scenario.
    async fn list_skills(&self) -> Result<Vec<Skill>, CatalogError>;

    /// Looks up a single scenario by skill name and scenario id.
    async fn get_scenario(&self, skill: &str, id: &str) -> Result<Scenario, CatalogError>;

    /// Picks up to `count` distinct scenarios of a skill at random.
    async fn random_scenarios(&self, skill: &str, count: usize) -> Result<Vec<Scenario>, CatalogError> {
        let skills = self.list_skills().await?;
        let skill = skills
            .iter()
            .find(|s| s.name == skill)
            .ok_or_else(|| CatalogError::NotFound(format!("Skill {} not found", skill)))?;
        let mut rng = rand::rng();
        Ok(skill
            .scenarios
            .choose_multiple(&mut rng, count)
            .cloned()
            .collect())
    }
}

/// A `ScenarioStore` backed by a directory of JSON files.
pub struct FileScenarioStore {
    dir: PathBuf,
    cache: RwLock<Option<Arc<Vec<Skill>>>>,
}

impl FileScenarioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drops the cached catalog so the next read goes back to disk.
    pub async fn refresh(&self) {
        *self.cache.write().await = None;
    }

    async fn catalog(&self) -> Result<Arc<Vec<Skill>>, CatalogError> {
        if let Some(skills) = self.cache.read().await.as_ref() {
            return Ok(skills.clone());
        }

        let mut cache = self.cache.write().await;
        // Another reader may have filled the cache while we waited for the lock.
        if let Some(skills) = cache.as_ref() {
            return Ok(skills.clone());
        }
        let skills = Arc::new(load_catalog(&self.dir).await?);
        *cache = Some(skills.clone());
        Ok(skills)
    }
}

#[async_trait]
impl ScenarioStore for FileScenarioStore {
    async fn list_skills(&self) -> Result<Vec<Skill>, CatalogError> {
        Ok(self.catalog().await?.as_ref().clone())
    }

    async fn get_scenario(&self, skill: &str, id: &str) -> Result<Scenario, CatalogError> {
        let skills = self.catalog().await?;
        let found = skills
            .iter()
            .find(|s| s.name == skill)
            .ok_or_else(|| CatalogError::NotFound(format!("Skill {} not found", skill)))?;
        found.scenario(id).cloned().ok_or_else(|| {
            CatalogError::NotFound(format!("Scenario {} not found in skill {}", id, skill))
        })
    }
}

/// Reads every `*.json` file in `dir` as one skill.
///
/// Files sort by name so the skill order is stable. Unreadable files and
/// unplayable scenarios are skipped with a warning.
pub async fn load_catalog(dir: &Path) -> Result<Vec<Skill>, CatalogError> {
    if !tokio::fs::try_exists(dir).await? {
        return Err(CatalogError::NotFound(format!(
            "Scenarios directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to stat scenario file"),
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(CatalogError::NotFound(
            "No JSON files found in scenarios directory".to_string(),
        ));
    }

    let mut skills = Vec::new();
    for path in files {
        let Some(skill_name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to read scenario file");
                continue;
            }
        };
        match parse_skill(skill_name, &content) {
            Ok(skill) if !skill.scenarios.is_empty() => skills.push(skill),
            Ok(_) => debug!(skill = %skill_name, "Skill has no playable scenarios"),
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to parse scenario file"),
        }
    }

    if skills.is_empty() {
        return Err(CatalogError::NotFound(
            "No valid skills or scenarios found in JSON files".to_string(),
        ));
    }

    info!(skills = skills.len(), dir = %dir.display(), "Scenario catalog loaded");
    Ok(skills)
}

/// Parses one skill file: a JSON object of scenario id to scenario fields.
pub fn parse_skill(skill_name: &str, content: &str) -> Result<Skill, serde_json::Error> {
    let entries: Map<String, Value> = serde_json::from_str(content)?;
    let mut scenarios = Vec::new();

    for (id, fields) in entries {
        let Value::Object(mut fields) = fields else {
            continue;
        };
        fields.insert("id".to_string(), Value::String(id.clone()));
        fields
            .entry("name")
            .or_insert_with(|| Value::String(id.clone()));
        fields
            .entry("skill")
            .or_insert_with(|| Value::String(skill_name.to_string()));

        match serde_json::from_value::<Scenario>(Value::Object(fields)) {
            Ok(scenario) if scenario.validate().is_ok() => scenarios.push(scenario),
            Ok(_) => warn!(skill = %skill_name, scenario = %id, "Skipping scenario without goal or opening"),
            Err(e) => warn!(skill = %skill_name, scenario = %id, error = %e, "Skipping malformed scenario"),
        }
    }

    Ok(Skill {
        name: skill_name.to_string(),
        scenarios,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const NEGOTIATION: &str = r#"{
        "raise": {
            "description": "Ask your manager for a raise",
            "goal": "Get a 10% raise",
            "opening": "*glances at the clock* You have five minutes.",
            "botname": "Dana",
            "botgender": "female"
        },
        "car": {
            "name": "Buy a used car",
            "goal": "Pay under 8000",
            "opening": "She's a beauty, isn't she?"
        },
        "broken": {
            "goal": "",
            "opening": "nobody home"
        }
    }"#;

    fn catalog_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("negotiation.json"), NEGOTIATION).unwrap();
        fs::write(
            dir.path().join("smalltalk.json"),
            r#"{"party": {"goal": "Learn their name", "opening": "Great music, right?"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("corrupt.json"), "{ not json").unwrap();
        fs::create_dir(dir.path().join("archive.json")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_list_skills_skips_bad_files_and_scenarios() {
        let dir = catalog_dir();
        let store = FileScenarioStore::new(dir.path());

        let skills = store.list_skills().await.unwrap();
        let names: Vec<_> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["negotiation", "smalltalk"]);

        let negotiation = &skills[0];
        let ids: Vec<_> = negotiation.scenarios.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["raise", "car"]);
        assert_eq!(negotiation.scenarios[0].name, "raise");
        assert_eq!(negotiation.scenarios[1].name, "Buy a used car");
        assert_eq!(negotiation.scenarios[0].skill, "negotiation");
    }

    #[tokio::test]
    async fn test_every_listed_scenario_is_retrievable_and_playable() {
        let dir = catalog_dir();
        let store = FileScenarioStore::new(dir.path());

        for skill in store.list_skills().await.unwrap() {
            for listed in &skill.scenarios {
                let scenario = store.get_scenario(&skill.name, &listed.id).await.unwrap();
                assert!(!scenario.goal.is_empty());
                assert!(!scenario.opening.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_get_scenario_not_found() {
        let dir = catalog_dir();
        let store = FileScenarioStore::new(dir.path());

        assert!(matches!(
            store.get_scenario("negotiation", "missing").await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            store.get_scenario("dancing", "raise").await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            store.get_scenario("negotiation", "broken").await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_or_empty_directory_is_not_found() {
        let store = FileScenarioStore::new("/definitely/not/here");
        assert!(matches!(store.list_skills().await, Err(CatalogError::NotFound(_))));

        let empty = TempDir::new().unwrap();
        let store = FileScenarioStore::new(empty.path());
        assert!(matches!(store.list_skills().await, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_catalog_is_cached_until_refresh() {
        let dir = catalog_dir();
        let store = FileScenarioStore::new(dir.path());
        assert_eq!(store.list_skills().await.unwrap().len(), 2);

        fs::write(
            dir.path().join("attraction.json"),
            r#"{"cafe": {"goal": "Get a number", "opening": "Is this seat taken?"}}"#,
        )
        .unwrap();
        assert_eq!(store.list_skills().await.unwrap().len(), 2);

        store.refresh().await;
        assert_eq!(store.list_skills().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_random_scenarios_are_distinct_and_bounded() {
        let dir = catalog_dir();
        let store = FileScenarioStore::new(dir.path());

        let picked = store.random_scenarios("negotiation", 3).await.unwrap();
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0].id, picked[1].id);

        assert!(store.random_scenarios("nothing", 3).await.is_err());
    }
}
