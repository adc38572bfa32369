//! Evaluator definitions: a configured instance of an evaluator type.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::StoreError;
use crate::evaluator_types::get_evaluator_type;
use crate::fs::{json_files, read_json, stem, write_json};
use crate::{StoreResult, DEFINITION_VERSION};

/// Default location of evaluator files relative to the project root.
pub const EVALUATORS_SUBDIR: &str = "evaluations/evaluators";

/// Key under `evaluatorConfig` holding the default criteria.
pub const DEFAULT_CRITERIA_KEY: &str = "defaultEvaluationCriteria";

fn default_version() -> String {
    DEFINITION_VERSION.to_string()
}

/// On-disk evaluator document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluator {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evaluator_type_id: String,
    #[serde(default)]
    pub evaluator_config: Map<String, Value>,
}

impl Evaluator {
    /// Default criteria applied when an evaluation carries none for this evaluator.
    pub fn default_criteria(&self) -> Option<&Value> {
        self.evaluator_config.get(DEFAULT_CRITERIA_KEY)
    }
}

/// Listing entry returned by [`EvaluatorStore::list_evaluators`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorSummary {
    pub id: String,
    pub description: String,
    pub evaluator_type_id: String,
    pub file_path: PathBuf,
    pub data: Evaluator,
}

/// CRUD over `evaluations/evaluators/*.json`.
#[derive(Debug, Clone)]
pub struct EvaluatorStore {
    evaluators_dir: PathBuf,
}

impl EvaluatorStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self::with_subdir(base_dir, EVALUATORS_SUBDIR)
    }

    pub fn with_subdir(base_dir: impl AsRef<Path>, subdir: impl AsRef<Path>) -> Self {
        Self {
            evaluators_dir: base_dir.as_ref().join(subdir),
        }
    }

    pub fn evaluators_dir(&self) -> &Path {
        &self.evaluators_dir
    }

    pub fn ensure_directory(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.evaluators_dir)
            .map_err(|e| StoreError::io(&self.evaluators_dir, e))
    }

    /// List every readable evaluator. Malformed files are skipped.
    pub fn list_evaluators(&self) -> Vec<EvaluatorSummary> {
        json_files(&self.evaluators_dir)
            .into_iter()
            .filter_map(|path| {
                let data: Evaluator = read_json(&path)?;
                let id = if data.id.is_empty() {
                    stem(&path)
                } else {
                    data.id.clone()
                };
                Some(EvaluatorSummary {
                    id,
                    description: data.description.clone(),
                    evaluator_type_id: data.evaluator_type_id.clone(),
                    file_path: path,
                    data,
                })
            })
            .collect()
    }

    /// Load an evaluator by ID: `<id>.json` first, then an `id` field scan.
    pub fn load_evaluator(&self, evaluator_id: &str) -> Option<Evaluator> {
        let direct = self.file_for(evaluator_id);
        if direct.exists() {
            return read_json(&direct);
        }
        self.find_by_id(evaluator_id).map(|(_, data)| data)
    }

    /// Create a new evaluator file.
    ///
    /// Fails when the type ID is unknown or `<id>.json` already exists.
    /// `default_criteria` is folded into `evaluatorConfig`.
    pub fn create_evaluator(
        &self,
        evaluator_id: &str,
        evaluator_type_id: &str,
        description: &str,
        config: Map<String, Value>,
        default_criteria: Option<Value>,
    ) -> StoreResult<PathBuf> {
        self.ensure_directory()?;

        if get_evaluator_type(evaluator_type_id).is_none() {
            return Err(StoreError::InvalidEvaluatorType(
                evaluator_type_id.to_string(),
            ));
        }

        let path = self.file_for(evaluator_id);
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                kind: "Evaluator",
                id: evaluator_id.to_string(),
            });
        }

        let mut evaluator_config = config;
        if let Some(criteria) = default_criteria.filter(is_present) {
            evaluator_config.insert(DEFAULT_CRITERIA_KEY.to_string(), criteria);
        }

        let evaluator = Evaluator {
            version: default_version(),
            id: evaluator_id.to_string(),
            description: description.to_string(),
            evaluator_type_id: evaluator_type_id.to_string(),
            evaluator_config,
        };
        write_json(&path, &evaluator)?;
        info!(evaluator_id, evaluator_type_id, "evaluator created");
        Ok(path)
    }

    /// Save an evaluator, overwriting whichever file currently holds this ID
    /// (matched by file name, then by `id` field). New IDs go to `<id>.json`.
    pub fn save_evaluator(
        &self,
        evaluator_id: &str,
        data: &Evaluator,
        default_criteria: Option<Value>,
    ) -> StoreResult<PathBuf> {
        self.ensure_directory()?;

        let mut evaluator = data.clone();
        evaluator.version = default_version();
        if evaluator.id.is_empty() {
            evaluator.id = evaluator_id.to_string();
        }
        if let Some(criteria) = default_criteria.filter(is_present) {
            evaluator
                .evaluator_config
                .insert(DEFAULT_CRITERIA_KEY.to_string(), criteria);
        }

        let direct = self.file_for(evaluator_id);
        let path = if direct.exists() {
            direct
        } else {
            self.find_by_id(evaluator_id)
                .map(|(path, _)| path)
                .unwrap_or(direct)
        };

        write_json(&path, &evaluator)?;
        Ok(path)
    }

    /// Delete `<id>.json`. Returns `false` when there was nothing to delete.
    pub fn delete_evaluator(&self, evaluator_id: &str) -> StoreResult<bool> {
        let path = self.file_for(evaluator_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        info!(evaluator_id, "evaluator deleted");
        Ok(true)
    }

    fn file_for(&self, evaluator_id: &str) -> PathBuf {
        self.evaluators_dir.join(format!("{evaluator_id}.json"))
    }

    fn find_by_id(&self, evaluator_id: &str) -> Option<(PathBuf, Evaluator)> {
        json_files(&self.evaluators_dir).into_iter().find_map(|path| {
            let data: Evaluator = read_json(&path)?;
            (data.id == evaluator_id).then_some((path, data))
        })
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
