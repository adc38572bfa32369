//! Eval set definitions: named collections of evaluation cases plus the
//! evaluators assigned to them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::StoreError;
use crate::fs::{json_files, read_json, stem, write_json};
use crate::{StoreResult, DEFINITION_VERSION};

/// Default location of eval set files relative to the project root.
pub const EVAL_SETS_SUBDIR: &str = "evaluations/eval-sets";

fn default_version() -> String {
    DEFINITION_VERSION.to_string()
}

/// A single evaluation case inside an eval set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Input handed to the runtime under test.
    #[serde(default)]
    pub inputs: Value,
    /// Per-evaluator criteria, keyed by evaluator ID.
    #[serde(default)]
    pub evaluation_criterias: Map<String, Value>,
    /// Fields this crate does not interpret, preserved on save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Evaluation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, inputs: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            inputs,
            evaluation_criterias: Map::new(),
            extra: Map::new(),
        }
    }

    /// Attach criteria for one evaluator.
    pub fn with_criteria(mut self, evaluator_id: impl Into<String>, criteria: Value) -> Self {
        self.evaluation_criterias.insert(evaluator_id.into(), criteria);
        self
    }
}

/// On-disk eval set document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalSet {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub evaluator_refs: Vec<String>,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Listing entry returned by [`EvalSetStore::list_eval_sets`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSetSummary {
    pub id: String,
    pub name: String,
    pub evaluator_refs: Vec<String>,
    pub evaluation_count: usize,
    pub file_path: PathBuf,
    pub data: EvalSet,
}

/// CRUD over `evaluations/eval-sets/*.json`.
#[derive(Debug, Clone)]
pub struct EvalSetStore {
    base_dir: PathBuf,
    eval_sets_dir: PathBuf,
}

impl EvalSetStore {
    /// Store rooted at `base_dir` using the default sub-directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self::with_subdir(base_dir, EVAL_SETS_SUBDIR)
    }

    pub fn with_subdir(base_dir: impl AsRef<Path>, subdir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let eval_sets_dir = base_dir.join(subdir);
        Self {
            base_dir,
            eval_sets_dir,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn eval_sets_dir(&self) -> &Path {
        &self.eval_sets_dir
    }

    /// Create the eval-sets directory if needed.
    pub fn ensure_directory(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.eval_sets_dir)
            .map_err(|e| StoreError::io(&self.eval_sets_dir, e))
    }

    /// List every readable eval set. Malformed files are skipped.
    pub fn list_eval_sets(&self) -> Vec<EvalSetSummary> {
        json_files(&self.eval_sets_dir)
            .into_iter()
            .filter_map(|path| {
                let data: EvalSet = read_json(&path)?;
                let file_stem = stem(&path);
                Some(EvalSetSummary {
                    id: non_empty_or(&data.id, &file_stem),
                    name: non_empty_or(&data.name, &file_stem),
                    evaluator_refs: data.evaluator_refs.clone(),
                    evaluation_count: data.evaluations.len(),
                    file_path: path,
                    data,
                })
            })
            .collect()
    }

    /// Load an eval set by ID: `<id>.json` first, then a scan of the `id`
    /// field of every file.
    pub fn load_eval_set(&self, eval_set_id: &str) -> Option<EvalSet> {
        let direct = self.file_for(eval_set_id);
        if direct.exists() {
            return read_json(&direct);
        }
        self.find_by_id(eval_set_id).map(|(_, data)| data)
    }

    /// Resolve a reference (a path, a file stem or an ID) to an existing eval
    /// set file.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let as_path = Path::new(reference);
        if as_path.is_file() {
            return Some(as_path.to_path_buf());
        }
        let in_base = self.base_dir.join(as_path);
        if in_base.is_file() {
            return Some(in_base);
        }
        let by_stem = self.file_for(&stem(as_path));
        if by_stem.is_file() {
            return Some(by_stem);
        }
        self.find_by_id(reference).map(|(path, _)| path)
    }

    /// Create a new eval set file. Fails if `<id>.json` already exists.
    pub fn create_eval_set(
        &self,
        eval_set_id: &str,
        name: &str,
        evaluator_refs: Vec<String>,
        evaluations: Vec<Evaluation>,
    ) -> StoreResult<PathBuf> {
        self.ensure_directory()?;

        let path = self.file_for(eval_set_id);
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                kind: "Eval set",
                id: eval_set_id.to_string(),
            });
        }

        let eval_set = EvalSet {
            version: default_version(),
            id: eval_set_id.to_string(),
            name: name.to_string(),
            evaluator_refs,
            evaluations,
            extra: Map::new(),
        };
        write_json(&path, &eval_set)?;
        info!(eval_set_id, path = %path.display(), "eval set created");
        Ok(path)
    }

    /// Write `data` to `<id>.json`, replacing any previous content.
    pub fn save_eval_set(&self, eval_set_id: &str, data: &EvalSet) -> StoreResult<PathBuf> {
        self.ensure_directory()?;
        let path = self.file_for(eval_set_id);
        write_json(&path, data)?;
        Ok(path)
    }

    fn file_for(&self, eval_set_id: &str) -> PathBuf {
        self.eval_sets_dir.join(format!("{eval_set_id}.json"))
    }

    fn find_by_id(&self, eval_set_id: &str) -> Option<(PathBuf, EvalSet)> {
        json_files(&self.eval_sets_dir).into_iter().find_map(|path| {
            let data: EvalSet = read_json(&path)?;
            (data.id == eval_set_id).then_some((path, data))
        })
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
