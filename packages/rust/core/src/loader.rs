//! Bulk loading of job postings and profiles into the context store.
//!
//! Each item is formatted into a plain-text context block, embedded, and
//! upserted as a [`ContextDocument`]. One bad item does not stop the run.

use std::path::Path;

use jobrelay_shared::{ContextDocument, ContextStore, Embedder, RelayError, Result};
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Placeholder for a missing field.
const MISSING: &str = "N/A";

/// What kind of item is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Job,
    Profile,
}

impl DocumentKind {
    /// `document_type` stored with the context row.
    pub fn document_type(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Profile => "profile",
        }
    }

    fn label_field(self) -> &'static str {
        match self {
            Self::Job => "title",
            Self::Profile => "name",
        }
    }

    /// Row id for the item at `index`.
    fn document_id(self, item: &Value, index: usize) -> String {
        match self {
            Self::Job => format!(
                "job_{}",
                scalar(item, "id").unwrap_or_else(|| index.to_string())
            ),
            Self::Profile => {
                scalar(item, "linkedin_url").unwrap_or_else(|| index.to_string())
            }
        }
    }

    fn format(self, item: &Value) -> String {
        match self {
            Self::Job => format_job_context(item),
            Self::Profile => format_profile_context(item),
        }
    }
}

/// Counts from one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: usize,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.loaded + self.failed
    }

    fn merge(&mut self, other: LoadReport) {
        self.loaded += other.loaded;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render a string-or-number field, `None` when missing or null.
fn scalar(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field(item: &Value, key: &str) -> String {
    scalar(item, key).unwrap_or_else(|| MISSING.to_string())
}

fn joined(item: &Value, key: &str, sep: &str) -> String {
    item.get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(sep)
        })
        .unwrap_or_default()
}

pub fn format_job_context(job: &Value) -> String {
    format!(
        "Job Title: {}\nCompany: {}\nLocation: {}\nEmployment Type: {}\n\
         Experience Level: {}\nSalary Range: {}\nSkills: {}\nDescription: {}",
        field(job, "title"),
        field(job, "company"),
        field(job, "location"),
        field(job, "employment_type"),
        field(job, "experience_level"),
        field(job, "salary_range"),
        joined(job, "skills", ", "),
        field(job, "description"),
    )
}

pub fn format_profile_context(profile: &Value) -> String {
    let education = profile
        .get("education")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|edu| {
                    format!(
                        "{} from {}",
                        scalar(edu, "degree").unwrap_or_default(),
                        scalar(edu, "school").unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    format!(
        "Name: {}\nTitle: {}\nCompany: {}\nLocation: {}\nExperience: {} years\n\
         Career Level: {}\nIndustry: {}\nSkills: {}\nEducation: {}\nSummary: {}\nLinkedIn: {}",
        field(profile, "name"),
        field(profile, "title"),
        field(profile, "company"),
        field(profile, "location"),
        scalar(profile, "experience_years").unwrap_or_else(|| "0".into()),
        field(profile, "career_level"),
        field(profile, "industry"),
        joined(profile, "skills", ", "),
        education,
        field(profile, "summary"),
        field(profile, "linkedin_url"),
    )
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read a JSON array of items from `path`.
pub fn read_items(path: &Path) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path).map_err(|e| RelayError::io(path, e))?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
        RelayError::validation(format!("{} is not valid JSON: {e}", path.display()))
    })?;
    match parsed {
        Value::Array(items) => Ok(items),
        _ => Err(RelayError::validation(format!(
            "{} must contain a JSON array",
            path.display()
        ))),
    }
}

/// Embed and upsert every item. Per-item failures are logged and counted.
#[instrument(skip_all, fields(kind = kind.document_type(), items = items.len()))]
pub async fn load_items(
    items: &[Value],
    kind: DocumentKind,
    user_id: i64,
    embedder: &dyn Embedder,
    store: &dyn ContextStore,
    progress: &dyn LoadProgress,
) -> LoadReport {
    let mut report = LoadReport::default();
    let total = items.len();
    progress.phase(&format!("Loading {} {}s", total, kind.document_type()));

    for (index, item) in items.iter().enumerate() {
        let id = kind.document_id(item, index);
        let label = scalar(item, kind.label_field()).unwrap_or_else(|| "Unknown".into());
        progress.item(index + 1, total, &label);

        match load_one(item, &id, kind, user_id, embedder, store).await {
            Ok(()) => {
                report.loaded += 1;
                info!(%id, "loaded");
            }
            Err(e) => {
                report.failed += 1;
                warn!(%id, error = %e, "failed to load item");
            }
        }
    }
    report
}

async fn load_one(
    item: &Value,
    id: &str,
    kind: DocumentKind,
    user_id: i64,
    embedder: &dyn Embedder,
    store: &dyn ContextStore,
) -> Result<()> {
    let context = kind.format(item);
    let embedding = embedder.embed(&context).await?;
    store
        .upsert_document(&ContextDocument {
            id: id.to_string(),
            embedding,
            context,
            user_id,
            document_type: kind.document_type().to_string(),
            document_id: Some(id.to_string()),
            username: None,
        })
        .await
}

/// Load the jobs file and/or profiles file. A file that cannot be read is
/// an error; individual items are not.
pub async fn load_files(
    jobs: Option<&Path>,
    profiles: Option<&Path>,
    user_id: i64,
    embedder: &dyn Embedder,
    store: &dyn ContextStore,
    progress: &dyn LoadProgress,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    for (path, kind) in [(jobs, DocumentKind::Job), (profiles, DocumentKind::Profile)] {
        let Some(path) = path else { continue };
        let items = read_items(path)?;
        report.merge(load_items(&items, kind, user_id, embedder, store, progress).await);
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for load runs.
pub trait LoadProgress: Send + Sync {
    /// Called when a new file starts.
    fn phase(&self, name: &str);
    /// Called before each item.
    fn item(&self, current: usize, total: usize, label: &str);
}

/// No-op progress reporter.
pub struct SilentLoadProgress;

impl LoadProgress for SilentLoadProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _current: usize, _total: usize, _label: &str) {}
}
