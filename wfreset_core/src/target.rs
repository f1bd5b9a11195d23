//! Sources of batch targets.
//!
//! A [`TargetSource`] yields workflow references lazily, either from a
//! line-oriented file or from a paginated visibility scan, and marks the ones
//! listed in the [`ExclusionSet`].
//!
//! # File format
//!
//! ```text
//! # comment
//! wf-1<TAB>run-A
//! wf-2
//! ```
//!
//! Column 0 is the workflow id, the optional column 1 the run id. Blank lines
//! are skipped with a warning.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::config::TargetInput;
use crate::error::{ResetError, Result};
use crate::service::{has_more, ScanRequest, WorkflowService, DEFAULT_PAGE_SIZE};
use crate::types::{ExclusionSet, WorkflowRef};

/// Classification of one input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedLine {
    Blank,
    Comment,
    Target(WorkflowRef),
}

/// Parses one line of an input or exclude file.
///
/// `line` is the 1-indexed line number used in errors.
pub fn parse_line(text: &str, separator: &str, line: usize) -> Result<ParsedLine> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(ParsedLine::Blank);
    }
    if text.starts_with('#') {
        return Ok(ParsedLine::Comment);
    }

    let mut columns = text.split(separator).map(str::trim);
    let workflow_id = columns.next().unwrap_or_default();
    if workflow_id.is_empty() {
        return Err(ResetError::MalformedLine { line });
    }
    let run_id = columns.next().map(str::to_string);
    Ok(ParsedLine::Target(WorkflowRef::new(workflow_id, run_id)))
}

/// Reads an exclude file. Only the workflow id column is used.
pub async fn load_exclusions(path: &Path, separator: &str) -> Result<ExclusionSet> {
    let mut lines = open_lines(path).await?;
    let mut ids = Vec::new();
    let mut line = 0;
    while let Some(text) = next_line(&mut lines, path).await? {
        line += 1;
        match parse_line(&text, separator, line)? {
            ParsedLine::Target(target) => ids.push(target.workflow_id),
            ParsedLine::Blank => tracing::warn!("exclude file line {line} is empty, skipped"),
            ParsedLine::Comment => {}
        }
    }
    let exclusions: ExclusionSet = ids.into_iter().collect();
    tracing::info!(count = exclusions.len(), "Loaded exclusions from {}", path.display());
    Ok(exclusions)
}

async fn open_lines(path: &Path) -> Result<Lines<BufReader<File>>> {
    let file = File::open(path).await.map_err(|source| ResetError::InputFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

async fn next_line(lines: &mut Lines<BufReader<File>>, path: &Path) -> Result<Option<String>> {
    lines
        .next_line()
        .await
        .map_err(|source| ResetError::InputFile {
            path: path.to_path_buf(),
            source,
        })
}

/// One item produced by a [`TargetSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceItem {
    /// To be processed
    Target(WorkflowRef),
    /// Listed in the exclusion set; must not be processed
    Excluded(WorkflowRef),
}

struct FileTargets {
    path: PathBuf,
    separator: String,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl FileTargets {
    async fn next(&mut self) -> Result<Option<WorkflowRef>> {
        while let Some(text) = next_line(&mut self.lines, &self.path).await? {
            self.line += 1;
            match parse_line(&text, &self.separator, self.line)? {
                ParsedLine::Target(target) => return Ok(Some(target)),
                ParsedLine::Blank => {
                    tracing::warn!("input line {} is empty, skipped", self.line)
                }
                ParsedLine::Comment => {}
            }
        }
        Ok(None)
    }
}

struct QueryTargets<S: WorkflowService + ?Sized> {
    service: Arc<S>,
    namespace: String,
    query: String,
    page_size: usize,
    buffered: VecDeque<WorkflowRef>,
    next_page_token: Option<Vec<u8>>,
    exhausted: bool,
    pages: usize,
}

impl<S: WorkflowService + ?Sized> QueryTargets<S> {
    async fn next(&mut self) -> Result<Option<WorkflowRef>> {
        loop {
            if let Some(target) = self.buffered.pop_front() {
                return Ok(Some(target));
            }
            if self.exhausted {
                return Ok(None);
            }
            // The token is only advanced on success, so a failed page can be
            // fetched again by calling `next` once more.
            let page = self
                .service
                .scan_executions(ScanRequest {
                    namespace: self.namespace.clone(),
                    query: self.query.clone(),
                    page_size: self.page_size,
                    next_page_token: self.next_page_token.clone(),
                })
                .await?;
            self.pages += 1;
            tracing::debug!(
                page = self.pages,
                executions = page.executions.len(),
                "Scanned visibility page"
            );
            self.buffered.extend(page.executions);
            if has_more(&page.next_page_token) {
                self.next_page_token = page.next_page_token;
            } else {
                self.exhausted = true;
            }
        }
    }
}

enum SourceKind<S: WorkflowService + ?Sized> {
    File(FileTargets),
    Query(QueryTargets<S>),
}

/// Lazy, finite, non-restartable sequence of batch targets.
pub struct TargetSource<S: WorkflowService + ?Sized> {
    kind: SourceKind<S>,
    exclusions: Arc<ExclusionSet>,
}

impl<S: WorkflowService + ?Sized> TargetSource<S> {
    /// Opens the configured input.
    ///
    /// File inputs are opened immediately so a missing file fails before any
    /// processing starts.
    pub async fn open(
        input: &TargetInput,
        service: Arc<S>,
        namespace: &str,
        exclusions: Arc<ExclusionSet>,
    ) -> Result<Self> {
        let kind = match input {
            TargetInput::File { path, separator } => SourceKind::File(FileTargets {
                path: path.clone(),
                separator: separator.clone(),
                lines: open_lines(path).await?,
                line: 0,
            }),
            TargetInput::Query(query) => SourceKind::Query(QueryTargets {
                service,
                namespace: namespace.to_string(),
                query: query.clone(),
                page_size: DEFAULT_PAGE_SIZE,
                buffered: VecDeque::new(),
                next_page_token: None,
                exhausted: false,
                pages: 0,
            }),
        };
        Ok(Self { kind, exclusions })
    }

    /// Returns the next item, or `None` once the input is exhausted.
    ///
    /// A failed visibility page leaves the source positioned on that page, so a
    /// retryable error may be followed by another call.
    pub async fn next(&mut self) -> Result<Option<SourceItem>> {
        let target = match &mut self.kind {
            SourceKind::File(file) => file.next().await?,
            SourceKind::Query(query) => query.next().await?,
        };
        Ok(target.map(|target| {
            if self.exclusions.contains(&target.workflow_id) {
                SourceItem::Excluded(target)
            } else {
                SourceItem::Target(target)
            }
        }))
    }
}
