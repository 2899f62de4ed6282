//! Rule Store (C2): filesystem-backed persistence for atomic and composite
//! rules, with dry-run validation on every save and atomic (write-temp,
//! fsync, rename) writes so a crash mid-save never leaves a half-written
//! rule file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use orion_error::StructError;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreReason};
use crate::evaluator;
use crate::graph_validator;
use crate::socket_registry::infer_socket_type;
use crate::types::{is_valid_rule_id, AtomicRule, CompositeRule};

const ATOMIC_EXT: &str = ".js";
const COMPOSITE_FILE: &str = "composite-rules.json";
const DRY_RUN_DEADLINE_MS: u64 = 50;

fn fail(message: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Validation(message.into()))
}

fn fatal(message: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Fatal(message.into()))
}

/// Everything the header line of an atomic rule file carries, separately
/// from the `code` that follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AtomicHeader {
    name: String,
    description: String,
    enabled: bool,
    socket_type: crate::types::SocketType,
    reads: Vec<String>,
    produces: Vec<String>,
    created_at: chrono::DateTime<Utc>,
    created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CompositeFile {
    #[serde(default)]
    rules: Vec<CompositeRule>,
}

/// A bundle exchanged between installations: rules plus a format tag so a
/// future incompatible bundle shape can be rejected cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBundle {
    pub format: String,
    pub atomic: Vec<AtomicRule>,
    pub composite: Vec<CompositeRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Merge,
    Overwrite,
}

pub struct RuleStore {
    root: PathBuf,
}

impl RuleStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| fatal(format!("cannot create rule store root {root:?}: {e}")))?;
        Ok(Self { root })
    }

    fn atomic_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}{ATOMIC_EXT}"))
    }

    fn composite_path(&self) -> PathBuf {
        self.root.join(COMPOSITE_FILE)
    }

    pub fn list_atomic(&self) -> Result<Vec<AtomicRule>, CoreError> {
        let mut rules = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => return Err(fatal(format!("cannot read rule store: {e}"))),
        };
        for entry in entries {
            let entry = entry.map_err(|e| fatal(format!("cannot read rule store entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            rules.push(self.read_atomic(&id, &path)?);
        }
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    fn read_atomic(&self, id: &str, path: &Path) -> Result<AtomicRule, CoreError> {
        let contents =
            fs::read_to_string(path).map_err(|e| fatal(format!("cannot read rule {id}: {e}")))?;
        let (header_line, code) = contents
            .split_once('\n')
            .ok_or_else(|| fatal(format!("rule {id} has no header line")))?;
        let header_json = header_line
            .strip_prefix("// ")
            .ok_or_else(|| fatal(format!("rule {id} header is not a `// {{...}}` comment")))?;
        let header: AtomicHeader = serde_json::from_str(header_json)
            .map_err(|e| fatal(format!("rule {id} header is malformed: {e}")))?;
        Ok(AtomicRule {
            id: id.to_string(),
            name: header.name,
            description: header.description,
            socket_type: header.socket_type,
            reads: header.reads,
            produces: header.produces,
            code: code.trim_end().to_string(),
            enabled: header.enabled,
            created_at: header.created_at,
            created_by: header.created_by,
            prompt: header.prompt,
            tags: header.tags,
        })
    }

    pub fn get_atomic(&self, id: &str) -> Result<AtomicRule, CoreError> {
        let path = self.atomic_path(id);
        if !path.exists() {
            return Err(fail(format!("no atomic rule named {id:?}")));
        }
        self.read_atomic(id, &path)
    }

    /// Validate, fill in derived fields, dry-run the code, then persist.
    /// `reads`/`produces`/`socket_type` are always recomputed from `code` so
    /// a caller can never desync them from what the code actually does.
    pub fn save_atomic(&self, mut rule: AtomicRule) -> Result<AtomicRule, CoreError> {
        if !is_valid_rule_id(&rule.id) {
            return Err(fail(format!("invalid rule id {:?}", rule.id)));
        }
        let program = cira_lang::parse(&rule.code)
            .map_err(|e| fail(format!("rule {} does not parse: {e}", rule.id)))?;
        rule.reads = program.reads();
        rule.produces = program.produces();
        rule.socket_type = infer_socket_type(&rule.reads);

        evaluator::dry_run(&rule.code, DRY_RUN_DEADLINE_MS)
            .map_err(|e| fail(format!("rule {} failed dry run: {e}", rule.id)))?;

        self.write_atomic(&rule)?;
        Ok(rule)
    }

    fn write_atomic(&self, rule: &AtomicRule) -> Result<(), CoreError> {
        let header = AtomicHeader {
            name: rule.name.clone(),
            description: rule.description.clone(),
            enabled: rule.enabled,
            socket_type: rule.socket_type,
            reads: rule.reads.clone(),
            produces: rule.produces.clone(),
            created_at: rule.created_at,
            created_by: rule.created_by.clone(),
            prompt: rule.prompt.clone(),
            tags: rule.tags.clone(),
        };
        let header_json = serde_json::to_string(&header)
            .map_err(|e| fatal(format!("cannot encode rule {} header: {e}", rule.id)))?;
        let contents = format!("// {header_json}\n{}\n", rule.code.trim_end());
        atomic_write(&self.atomic_path(&rule.id), contents.as_bytes())
    }

    pub fn delete_atomic(&self, id: &str) -> Result<(), CoreError> {
        let path = self.atomic_path(id);
        if !path.exists() {
            return Err(fail(format!("no atomic rule named {id:?}")));
        }
        fs::remove_file(&path).map_err(|e| fatal(format!("cannot delete rule {id}: {e}")))
    }

    pub fn toggle_atomic(&self, id: &str, enabled: bool) -> Result<AtomicRule, CoreError> {
        let mut rule = self.get_atomic(id)?;
        rule.enabled = enabled;
        self.write_atomic(&rule)?;
        Ok(rule)
    }

    pub fn list_composite(&self) -> Result<Vec<CompositeRule>, CoreError> {
        Ok(self.read_composite_file()?.rules)
    }

    fn read_composite_file(&self) -> Result<CompositeFile, CoreError> {
        let path = self.composite_path();
        if !path.exists() {
            return Ok(CompositeFile::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| fatal(format!("cannot read composite rule file: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| fatal(format!("composite rule file is malformed: {e}")))
    }

    fn write_composite_file(&self, file: &CompositeFile) -> Result<(), CoreError> {
        let contents = serde_json::to_string_pretty(file)
            .map_err(|e| fatal(format!("cannot encode composite rule file: {e}")))?;
        atomic_write(&self.composite_path(), contents.as_bytes())
    }

    pub fn save_composite(&self, mut rule: CompositeRule) -> Result<CompositeRule, CoreError> {
        if !is_valid_rule_id(&rule.id) {
            return Err(fail(format!("invalid rule id {:?}", rule.id)));
        }
        graph_validator::validate(&rule)?;

        let mut file = self.read_composite_file()?;
        if let Some(slot) = file.rules.iter_mut().find(|r| r.id == rule.id) {
            std::mem::swap(slot, &mut rule);
        } else {
            file.rules.push(rule.clone());
        }
        self.write_composite_file(&file)?;
        Ok(rule)
    }

    pub fn delete_composite(&self, id: &str) -> Result<(), CoreError> {
        let mut file = self.read_composite_file()?;
        let before = file.rules.len();
        file.rules.retain(|r| r.id != id);
        if file.rules.len() == before {
            return Err(fail(format!("no composite rule named {id:?}")));
        }
        self.write_composite_file(&file)
    }

    pub fn toggle_composite(&self, id: &str, enabled: bool) -> Result<CompositeRule, CoreError> {
        let mut file = self.read_composite_file()?;
        let rule = file
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| fail(format!("no composite rule named {id:?}")))?;
        rule.enabled = enabled;
        let out = rule.clone();
        self.write_composite_file(&file)?;
        Ok(out)
    }

    pub fn export_bundle(&self) -> Result<RuleBundle, CoreError> {
        Ok(RuleBundle {
            format: "cira-recipe/1.0".to_string(),
            atomic: self.list_atomic()?,
            composite: self.list_composite()?,
        })
    }

    /// Import a bundle. Imported rules are always stored disabled, so an
    /// operator reviews and enables them explicitly rather than having
    /// someone else's rules take effect immediately. Under `Merge`, ids
    /// that already exist in the store are left untouched; `Overwrite`
    /// clears the store first so every bundle id lands fresh.
    pub fn import_bundle(&self, bundle: RuleBundle, mode: ImportMode) -> Result<(), CoreError> {
        if bundle.format != "cira-recipe/1.0" {
            return Err(fail(format!("unsupported bundle format {:?}", bundle.format)));
        }

        if mode == ImportMode::Overwrite {
            for existing in self.list_atomic()? {
                self.delete_atomic(&existing.id)?;
            }
            self.write_composite_file(&CompositeFile::default())?;
        }

        for mut rule in bundle.atomic {
            if mode == ImportMode::Merge && self.get_atomic(&rule.id).is_ok() {
                continue;
            }
            rule.enabled = false;
            self.save_atomic(rule)?;
        }

        let existing_composite: std::collections::HashSet<String> = if mode == ImportMode::Merge {
            self.list_composite()?.into_iter().map(|r| r.id).collect()
        } else {
            std::collections::HashSet::new()
        };
        for mut rule in bundle.composite {
            if mode == ImportMode::Merge && existing_composite.contains(&rule.id) {
                continue;
            }
            rule.enabled = false;
            self.save_composite(rule)?;
        }
        Ok(())
    }
}

/// Write-temp, fsync, rename: the file at `path` either has its old
/// contents or its fully-written new contents, never a partial write.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| fatal(format!("path {path:?} has no parent directory")))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| fatal(format!("cannot create temp file in {dir:?}: {e}")))?;
    tmp.write_all(contents)
        .map_err(|e| fatal(format!("cannot write temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| fatal(format!("cannot fsync temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| fatal(format!("cannot rename temp file into place: {e}")))?;
    Ok(())
}
