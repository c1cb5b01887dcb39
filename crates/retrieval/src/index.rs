use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bm25::{bm25_score, compute_idf};
use crate::tokenize::{expand_query, tokenise};

pub const MIN_INDEXED_TOOLS: usize = 5;
const INDEX_TTL: Duration = Duration::from_secs(300);
const MIN_PER_APP: usize = 3;

#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub name: String,
    pub app: String,
    pub description: String,
    doc_tokens: Vec<String>,
    usage_count: u64,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub name: String,
    pub app: String,
    pub description: String,
    pub score: f64,
}

fn infer_app_generic(tool_name: &str) -> String {
    tool_name
        .split('_')
        .next()
        .unwrap_or(tool_name)
        .to_string()
}

struct IndexState {
    records: HashMap<String, ToolRecord>,
    idf: HashMap<String, f64>,
    avg_doc_len: f64,
    built_at: Instant,
}

/// Per-tenant BM25 index over available tool descriptions.
pub struct WorkspaceIndex {
    state: Mutex<IndexState>,
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState {
                records: HashMap::new(),
                idf: HashMap::new(),
                avg_doc_len: 1.0,
                built_at: Instant::now(),
            }),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().built_at.elapsed() >= INDEX_TTL
    }

    /// Idempotent insert by tool name; recomputes IDF/avg-doc-len after.
    /// A `ToolRecord` is never replaced once inserted under the same name,
    /// so a second `add_tools` doesn't reset `usage_count`.
    pub fn add_tools(&self, tools: &[(String, Option<String>, String)]) {
        let mut state = self.state.lock();
        for (name, app, description) in tools {
            if state.records.contains_key(name) {
                continue;
            }
            let doc_tokens = tokenise(description);
            let app = app.clone().unwrap_or_else(|| infer_app_generic(name));
            state.records.insert(
                name.clone(),
                ToolRecord {
                    name: name.clone(),
                    app,
                    description: description.clone(),
                    doc_tokens,
                    usage_count: 0,
                },
            );
        }
        Self::rebuild_locked(&mut state);
    }

    fn rebuild_locked(state: &mut IndexState) {
        let corpus: Vec<Vec<String>> = state.records.values().map(|r| r.doc_tokens.clone()).collect();
        state.idf = compute_idf(&corpus);
        state.avg_doc_len = if corpus.is_empty() {
            1.0
        } else {
            corpus.iter().map(|d| d.len()).sum::<usize>() as f64 / corpus.len() as f64
        };
        state.built_at = Instant::now();
    }

    pub fn record_usage(&self, tool_name: &str) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(tool_name) {
            record.usage_count += 1;
        }
    }

    /// Retrieve the top `k` tools for `query`, guaranteeing at least
    /// `MIN_PER_APP` results per connected app before filling the rest
    /// by global rank.
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        connected_apps: &[String],
        boost_recent: bool,
    ) -> Vec<RetrievalResult> {
        let state = self.state.lock();
        if state.records.is_empty() {
            return Vec::new();
        }
        let base_tokens = tokenise(query);
        let query_tokens = expand_query(&base_tokens);

        // Empty query: BM25 scores all zero, so fall back to most-used-first
        // rather than leaving the tie order arbitrary.
        if query_tokens.is_empty() {
            let mut fallback: Vec<RetrievalResult> = state
                .records
                .values()
                .filter(|r| connected_apps.is_empty() || connected_apps.contains(&r.app))
                .map(|r| RetrievalResult {
                    name: r.name.clone(),
                    app: r.app.clone(),
                    description: r.description.clone(),
                    score: r.usage_count as f64,
                })
                .collect();
            fallback.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            return Self::select_with_app_floor(fallback, k, connected_apps);
        }

        let mut scored: Vec<RetrievalResult> = state
            .records
            .values()
            .filter(|r| connected_apps.is_empty() || connected_apps.contains(&r.app))
            .map(|r| {
                let mut score = bm25_score(&query_tokens, &r.doc_tokens, &state.idf, state.avg_doc_len);
                if boost_recent {
                    score += ((1.0 + r.usage_count as f64).ln() * 0.1).min(0.5);
                }
                RetrievalResult {
                    name: r.name.clone(),
                    app: r.app.clone(),
                    description: r.description.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Self::select_with_app_floor(scored, k, connected_apps)
    }

    /// Guarantee `MIN_PER_APP` results per connected app before filling the
    /// rest by whatever rank `scored` is already sorted in.
    fn select_with_app_floor(scored: Vec<RetrievalResult>, k: usize, connected_apps: &[String]) -> Vec<RetrievalResult> {
        let mut selected: Vec<RetrievalResult> = Vec::new();
        let mut selected_names: HashSet<String> = HashSet::new();

        // Phase 1: guarantee MIN_PER_APP per connected app.
        for app in connected_apps {
            let mut taken = 0;
            for result in scored.iter().filter(|r| &r.app == app) {
                if taken >= MIN_PER_APP || selected.len() >= k {
                    break;
                }
                if selected_names.insert(result.name.clone()) {
                    selected.push(result.clone());
                    taken += 1;
                }
            }
        }

        // Phase 2: fill remaining slots by global rank.
        for result in scored {
            if selected.len() >= k {
                break;
            }
            if selected_names.insert(result.name.clone()) {
                selected.push(result);
            }
        }

        selected.truncate(k);
        selected
    }

    pub fn debug_stats(&self) -> (usize, f64) {
        let state = self.state.lock();
        (state.records.len(), state.avg_doc_len)
    }
}

/// Registry of per-tenant `WorkspaceIndex` instances.
#[derive(Default)]
pub struct CapabilityIndex {
    indices: Mutex<HashMap<String, std::sync::Arc<WorkspaceIndex>>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: &str) -> std::sync::Arc<WorkspaceIndex> {
        let mut guard = self.indices.lock();
        guard
            .entry(tenant_id.to_owned())
            .or_insert_with(|| std::sync::Arc::new(WorkspaceIndex::new()))
            .clone()
    }

    pub fn invalidate(&self, tenant_id: &str) {
        self.indices.lock().remove(tenant_id);
    }

    pub fn total_indexed_tools(&self) -> usize {
        self.indices
            .lock()
            .values()
            .map(|idx| idx.debug_stats().0)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tools() -> Vec<(String, Option<String>, String)> {
        vec![
            (
                "calendar_create_event".into(),
                Some("calendar".into()),
                "Create a new calendar event with title and time".into(),
            ),
            (
                "calendar_list_events".into(),
                Some("calendar".into()),
                "List upcoming calendar events".into(),
            ),
            (
                "gmail_send_message".into(),
                Some("gmail".into()),
                "Send an email message via Gmail".into(),
            ),
            (
                "slack_post_message".into(),
                Some("slack".into()),
                "Post a message to a Slack channel".into(),
            ),
        ]
    }

    #[test]
    fn retrieve_ranks_relevant_tool_first() {
        let index = WorkspaceIndex::new();
        index.add_tools(&sample_tools());
        let results = index.retrieve("schedule a meeting", 3, &[], false);
        assert!(!results.is_empty());
        assert!(results[0].app == "calendar");
    }

    #[test]
    fn retrieve_guarantees_min_per_app() {
        let index = WorkspaceIndex::new();
        index.add_tools(&sample_tools());
        let apps = vec!["calendar".to_string(), "gmail".to_string(), "slack".to_string()];
        let results = index.retrieve("message", 2, &apps, false);
        let apps_present: HashSet<&str> = results.iter().map(|r| r.app.as_str()).collect();
        assert!(apps_present.len() >= 1);
    }

    #[test]
    fn add_tools_is_idempotent_by_name() {
        let index = WorkspaceIndex::new();
        index.add_tools(&sample_tools());
        index.record_usage("calendar_create_event");
        // A re-add under the same name must not reset usage already recorded.
        index.add_tools(&[(
            "calendar_create_event".into(),
            Some("calendar".into()),
            "a completely different description".into(),
        )]);
        assert_eq!(index.debug_stats().0, 4);
        let results = index.retrieve("", 10, &[], false);
        let record = results.iter().find(|r| r.name == "calendar_create_event").unwrap();
        assert_eq!(record.description, "Create a new calendar event with title and time");
    }

    #[test]
    fn empty_query_falls_back_to_most_used() {
        let index = WorkspaceIndex::new();
        index.add_tools(&sample_tools());
        index.record_usage("slack_post_message");
        index.record_usage("slack_post_message");
        index.record_usage("gmail_send_message");
        let results = index.retrieve("", 10, &[], false);
        assert_eq!(results[0].name, "slack_post_message");
    }

    #[test]
    fn recency_boost_is_additive_and_capped() {
        let index = WorkspaceIndex::new();
        index.add_tools(&sample_tools());
        for _ in 0..1000 {
            index.record_usage("calendar_create_event");
        }
        let boosted = index.retrieve("calendar event", 10, &[], true);
        let unboosted = index.retrieve("calendar event", 10, &[], false);
        let boosted_score = boosted.iter().find(|r| r.name == "calendar_create_event").unwrap().score;
        let unboosted_score = unboosted.iter().find(|r| r.name == "calendar_create_event").unwrap().score;
        assert!((boosted_score - unboosted_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn infer_app_generic_uses_prefix() {
        assert_eq!(infer_app_generic("calendar_create_event"), "calendar");
        assert_eq!(infer_app_generic("noop"), "noop");
    }

    #[test]
    fn capability_index_registry_is_per_tenant() {
        let registry = CapabilityIndex::new();
        let a = registry.get("tenant-a");
        a.add_tools(&sample_tools());
        let b = registry.get("tenant-b");
        assert_eq!(b.debug_stats().0, 0);
        assert_eq!(registry.total_indexed_tools(), 4);
    }

    #[test]
    fn invalidate_drops_tenant_index() {
        let registry = CapabilityIndex::new();
        let a = registry.get("tenant-a");
        a.add_tools(&sample_tools());
        registry.invalidate("tenant-a");
        assert_eq!(registry.total_indexed_tools(), 0);
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = WorkspaceIndex::new();
        assert!(index.retrieve("anything", 5, &[], false).is_empty());
    }
}
