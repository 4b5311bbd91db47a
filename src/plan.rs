//! JSON plan files describing a whole filtering stage.
//!
//! ```json
//! {
//!   "vector_file": "exp/xvectors/voxceleb/xvector.scp",
//!   "jobs": [
//!     { "manifest": "data/voxceleb/utt2spk", "output": "exp/plda/train/utt2spk" },
//!     { "manifest": "data/adapt/utt2spk", "output": "exp/plda/adapt/utt2spk" }
//!   ]
//! }
//! ```
//!
//! An input path (`vector_file`, `manifest`) that already names an existing
//! file is used as given; any other relative path, outputs included, is
//! resolved against the directory holding the plan file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FilterError, Result};
use crate::filter::FilterJob;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilterPlan {
    pub vector_file: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Vec<FilterJob>,
}

impl FilterPlan {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FilterError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| FilterError::io(path, e))?;
        let plan: FilterPlan = serde_json::from_str(&text).map_err(|e| FilterError::Plan {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(plan.resolve_against(base))
    }

    fn resolve_against(self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        let resolve_input = |p: PathBuf| if p.is_file() { p } else { resolve(p) };
        Self {
            vector_file: self.vector_file.map(resolve_input),
            jobs: self
                .jobs
                .into_iter()
                .map(|job| FilterJob {
                    manifest: resolve_input(job.manifest),
                    output: resolve(job.output),
                })
                .collect(),
        }
    }
}
