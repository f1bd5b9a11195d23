//! Batch configuration, validated once before processing starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ResetError, Result};
use crate::safety::SafetyFilter;
use crate::types::{ReapplyPolicy, ResetStrategy};

/// Default column separator for input and exclude files.
pub const DEFAULT_SEPARATOR: &str = "\t";

/// Read-only parameters shared by every worker of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResetConfig {
    pub namespace: String,
    pub reason: String,
    pub strategy: ResetStrategy,
    pub skip_if_open: bool,
    pub skip_if_base_not_current: bool,
    pub non_deterministic_only: bool,
    pub dry_run: bool,
    pub reapply_policy: ReapplyPolicy,
    pub parallelism: usize,
}

impl BatchResetConfig {
    /// Creates a configuration with all filters off, one worker, and the
    /// `default` namespace.
    pub fn new(reason: impl Into<String>, strategy: ResetStrategy) -> Self {
        Self {
            namespace: "default".to_string(),
            reason: reason.into(),
            strategy,
            skip_if_open: false,
            skip_if_base_not_current: false,
            non_deterministic_only: false,
            dry_run: false,
            reapply_policy: ReapplyPolicy::All,
            parallelism: 1,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_skip_if_open(mut self, skip: bool) -> Self {
        self.skip_if_open = skip;
        self
    }

    pub fn with_skip_if_base_not_current(mut self, skip: bool) -> Self {
        self.skip_if_base_not_current = skip;
        self
    }

    pub fn with_non_deterministic_only(mut self, only: bool) -> Self {
        self.non_deterministic_only = only;
        self
    }

    pub fn with_reapply_policy(mut self, policy: ReapplyPolicy) -> Self {
        self.reapply_policy = policy;
        self
    }

    /// The enabled safety checks.
    pub fn safety_filter(&self) -> SafetyFilter {
        SafetyFilter {
            skip_if_open: self.skip_if_open,
            skip_if_base_not_current: self.skip_if_base_not_current,
            non_deterministic_only: self.non_deterministic_only,
        }
    }

    /// Rejects configurations a batch must not start with.
    pub fn validate(&self) -> Result<()> {
        if self.reason.trim().is_empty() {
            return Err(ResetError::Config("reason flag cannot be empty".to_string()));
        }
        if self.parallelism == 0 {
            return Err(ResetError::Config("parallelism must be at least 1".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(ResetError::Config("namespace cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Where batch targets come from. Exactly one source per batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetInput {
    /// Line-oriented file of `workflowId[<sep>runId]`
    File { path: PathBuf, separator: String },
    /// Visibility query
    Query(String),
}

impl TargetInput {
    /// Builds the input from the two mutually exclusive options.
    pub fn from_options(
        input_file: Option<PathBuf>,
        query: Option<String>,
        separator: Option<String>,
    ) -> Result<Self> {
        let query = query.filter(|q| !q.trim().is_empty());
        match (input_file, query) {
            (Some(path), None) => {
                let separator = separator.unwrap_or_else(|| DEFAULT_SEPARATOR.to_string());
                if separator.is_empty() {
                    return Err(ResetError::Config("input separator cannot be empty".to_string()));
                }
                Ok(TargetInput::File { path, separator })
            }
            (None, Some(query)) => Ok(TargetInput::Query(query)),
            (None, None) => Err(ResetError::Config(
                "must provide input file or list query to get target workflows to reset".to_string(),
            )),
            (Some(_), Some(_)) => Err(ResetError::Config(
                "input file and list query are mutually exclusive".to_string(),
            )),
        }
    }
}
