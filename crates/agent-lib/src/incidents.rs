//! Error-log extraction
//!
//! Segments raw log text into error blocks with a two-state machine. A
//! keyword line opens a block (flushing any open one), a blank line closes
//! it, and end of input flushes whatever is still open. Malformed text
//! never fails; at worst it yields no blocks or one large block.

use crate::models::{IncidentLevel, IncidentRecord, RuntimeKind};
use crate::runtime::{AdapterError, RuntimeAdapter};
use crate::store::{StateStore, StoreError};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Case-sensitive markers that open an error block
pub const KEYWORDS: &[&str] = &["ERROR", "Error", "Exception", "Traceback", "Stacktrace"];

/// Maximum summary length in characters
pub const SUMMARY_MAX_CHARS: usize = 1024;

fn is_trigger(line: &str) -> bool {
    KEYWORDS.iter().any(|k| line.contains(k))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Capturing(Vec<String>),
}

/// Line-by-line block segmenter
#[derive(Debug, Clone)]
pub struct LogSegmenter {
    state: State,
}

impl Default for LogSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSegmenter {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, State::Capturing(_))
    }

    /// Feed one line; returns a block when this line completed one
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if is_trigger(line) {
            let flushed = self.take_block();
            self.state = State::Capturing(vec![line.to_string()]);
            return flushed;
        }

        if line.trim().is_empty() {
            return self.take_block();
        }
        if let State::Capturing(lines) = &mut self.state {
            lines.push(line.to_string());
        }
        None
    }

    /// End of input: flush the open block, if any
    pub fn finish(mut self) -> Option<String> {
        self.take_block()
    }

    fn take_block(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::Capturing(lines) => Some(lines.join("\n")),
        }
    }
}

/// Split log text into error blocks
pub fn extract_blocks(log: &str) -> Vec<String> {
    let mut segmenter = LogSegmenter::new();
    let mut blocks: Vec<String> = log.lines().filter_map(|l| segmenter.push_line(l)).collect();
    blocks.extend(segmenter.finish());
    blocks
}

/// First line of a block, at most [`SUMMARY_MAX_CHARS`] characters
pub fn summarize(block: &str) -> String {
    block
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(SUMMARY_MAX_CHARS)
        .collect()
}

/// Timestamp prefixed by the runtime (`2024-03-01T10:00:00.123Z message`)
fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let token = line.split_whitespace().next()?;
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Owner of the logs being scanned
#[derive(Debug, Clone)]
pub struct IncidentContext {
    pub source_type: RuntimeKind,
    pub container_id: String,
    pub container_name: String,
    pub service_name: Option<String>,
    pub level: IncidentLevel,
}

impl IncidentContext {
    pub fn new(
        source_type: RuntimeKind,
        container_id: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            source_type,
            container_id: container_id.into(),
            container_name: container_name.into(),
            service_name: None,
            level: IncidentLevel::default(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }
}

/// Turn log text into incident records
///
/// Blocks whose first line carries a runtime timestamp use it; the rest
/// use `fallback`.
pub fn build_incidents(
    ctx: &IncidentContext,
    log: &str,
    fallback: DateTime<Utc>,
) -> Vec<IncidentRecord> {
    extract_blocks(log)
        .into_iter()
        .map(|block| IncidentRecord {
            source_type: ctx.source_type,
            container_id: ctx.container_id.clone(),
            container_name: ctx.container_name.clone(),
            timestamp: leading_timestamp(&block).unwrap_or(fallback),
            summary: summarize(&block),
            message: block,
            level: ctx.level,
            service_name: ctx.service_name.clone(),
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot fetch logs: {0}")]
    Logs(#[from] AdapterError),
    #[error("cannot store incidents: {0}")]
    Store(#[from] StoreError),
}

/// Fetch the tail of a unit's logs and record every error block
///
/// Incidents are not deduplicated across calls, so scanning the same
/// window twice records its blocks twice.
pub async fn scan_unit_logs(
    adapter: &dyn RuntimeAdapter,
    store: &dyn StateStore,
    ctx: &IncidentContext,
    container: Option<&str>,
    tail: usize,
) -> Result<usize, ScanError> {
    let log = adapter.fetch_logs(&ctx.container_id, container, tail).await?;
    let incidents = build_incidents(ctx, &log, Utc::now());
    let count = store.append_incidents(incidents).await?;

    debug!(container = %ctx.container_name, count = count, "Scanned container logs");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawStatsSnapshot, RawUnitDescriptor, UnitAction};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    #[test]
    fn test_single_block_closed_by_blank_line() {
        let blocks = extract_blocks("INFO ok\nERROR boom\nline2\n\nINFO next");
        assert_eq!(blocks, vec!["ERROR boom\nline2".to_string()]);
        assert_eq!(summarize(&blocks[0]), "ERROR boom");
    }

    #[test]
    fn test_no_keywords_yields_nothing() {
        assert!(extract_blocks("INFO starting\nDEBUG ready\nINFO done").is_empty());
        assert!(extract_blocks("").is_empty());
    }

    #[test]
    fn test_open_block_flushed_at_end_of_input() {
        let blocks = extract_blocks("Traceback (most recent call last):\n  File \"app.py\"\nValueError: bad");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines().count(), 3);
    }

    #[test]
    fn test_keyword_line_starts_new_block() {
        let blocks = extract_blocks("ERROR first\ncontext\nException: second\nmore");
        assert_eq!(
            blocks,
            vec!["ERROR first\ncontext".to_string(), "Exception: second\nmore".to_string()]
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert!(extract_blocks("error: lowercase is ignored\nexception too").is_empty());
    }

    #[test]
    fn test_segmenter_transitions() {
        let mut seg = LogSegmenter::new();
        assert_eq!(seg.push_line("INFO ok"), None);
        assert!(!seg.is_capturing());

        assert_eq!(seg.push_line("Stacktrace:"), None);
        assert!(seg.is_capturing());
        assert_eq!(seg.push_line("  at main"), None);

        assert_eq!(seg.push_line("   "), Some("Stacktrace:\n  at main".to_string()));
        assert!(!seg.is_capturing());
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_summary_truncated_to_limit() {
        let long = format!("ERROR {}", "x".repeat(3000));
        let blocks = extract_blocks(&long);
        let summary = summarize(&blocks[0]);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(blocks[0].len() > SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_build_incidents_uses_runtime_timestamp() {
        let ctx = IncidentContext::new(RuntimeKind::Docker, "abc123", "web").with_service("shop");
        let fallback = Utc::now();
        let log = "2024-03-01T10:00:00.5Z ERROR boom\n2024-03-01T10:00:00.6Z   at x\n\nERROR no stamp";

        let incidents = build_incidents(&ctx, log, fallback);
        assert_eq!(incidents.len(), 2);
        assert_eq!(
            incidents[0].timestamp,
            DateTime::parse_from_rfc3339("2024-03-01T10:00:00.5Z").unwrap()
        );
        assert_eq!(incidents[1].timestamp, fallback);
        assert_eq!(incidents[0].level, IncidentLevel::Error);
        assert_eq!(incidents[0].service_name.as_deref(), Some("shop"));
        assert_eq!(incidents[1].summary, "ERROR no stamp");
    }

    struct LogOnly(&'static str);

    #[async_trait]
    impl RuntimeAdapter for LogOnly {
        fn kind(&self) -> RuntimeKind {
            RuntimeKind::Docker
        }

        async fn list_units(&self) -> Result<Vec<RawUnitDescriptor>, AdapterError> {
            Ok(Vec::new())
        }

        async fn get_stats(&self, _unit_id: &str) -> Result<Option<RawStatsSnapshot>, AdapterError> {
            Ok(None)
        }

        async fn fetch_logs(
            &self,
            _unit_id: &str,
            _container: Option<&str>,
            _tail: usize,
        ) -> Result<String, AdapterError> {
            Ok(self.0.to_string())
        }

        async fn perform_action(&self, _unit_id: &str, _action: UnitAction) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scan_unit_logs_records_each_block_every_time() {
        let adapter = LogOnly("ERROR one\n\nINFO fine\nException: two");
        let store = MemoryStore::new();
        let ctx = IncidentContext::new(RuntimeKind::Docker, "abc123", "web");

        assert_eq!(scan_unit_logs(&adapter, &store, &ctx, None, 100).await.unwrap(), 2);
        assert_eq!(scan_unit_logs(&adapter, &store, &ctx, None, 100).await.unwrap(), 2);
        assert_eq!(store.incidents(Some("abc123")).await.unwrap().len(), 4);
    }
}
