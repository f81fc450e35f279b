//! Per-screen list state and the intents a header/table view can emit.

use serde::Serialize;

use crate::engine::{self, PageResult};
use crate::entity::EntitySpec;
use crate::error::{DeleteError, ExportError, QueryError};
use crate::export::{self, CsvFormat};
use crate::query::{FilterPatch, FilterState, ListQuery, PageRequest, SearchState};
use crate::stats::{self, StatsScope, StatsSnapshot};
use crate::store::DataStore;

/// Tag attached to each fetch; only the latest issued one may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct Sequencer {
    issued: u64,
}

impl Sequencer {
    pub fn issue(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    pub fn is_latest(&self, ticket: Ticket) -> bool {
        ticket.0 == self.issued
    }
}

/// Query state a result was fetched for.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFor {
    pub filters: FilterState,
    pub search: SearchState,
    pub page: PageRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loaded {
    #[serde(flatten)]
    pub result: PageResult,
    #[serde(skip)]
    pub stats: StatsSnapshot,
    #[serde(skip)]
    pub request: LoadedFor,
}

impl Loaded {
    fn answers(&self, filters: &FilterState, search: &SearchState, page: PageRequest) -> bool {
        self.request.page == page && self.request.search == *search && self.request.filters == *filters
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenErrorState {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub number: u32,
    pub size: u32,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenView<'a> {
    pub screen_id: &'a str,
    pub entity: &'static str,
    pub search: &'a SearchState,
    pub filters: &'a FilterState,
    pub page: PageView,
    pub result: Option<&'a Loaded>,
    /// Set when `result` was fetched for other search/filters/page than the
    /// ones shown, i.e. the latest fetch for them failed.
    pub result_stale: bool,
    pub stats: Option<&'a StatsSnapshot>,
    pub error: Option<&'a ScreenErrorState>,
}

pub struct ExportFile {
    pub file_name: String,
    pub csv: String,
    pub row_count: usize,
}

pub struct ScreenSession {
    id: String,
    spec: &'static EntitySpec,
    filters: FilterState,
    search: SearchState,
    page: PageRequest,
    sequencer: Sequencer,
    loaded: Option<Loaded>,
    error: Option<ScreenErrorState>,
}

/// Fetches the page and projects its stats for the configured scope.
pub fn load(
    store: &dyn DataStore,
    spec: &'static EntitySpec,
    filters: &FilterState,
    search: &SearchState,
    page: PageRequest,
    scope: StatsScope,
) -> Result<Loaded, QueryError> {
    let result = engine::fetch_page(store, spec, filters, search, page)?;
    let stats = match scope {
        StatsScope::Page => stats::project(spec, &result.rows, scope),
        StatsScope::Filtered => {
            let all = engine::fetch_all(store, spec, filters, search)?;
            stats::project(spec, &all, scope)
        }
    };
    Ok(Loaded {
        result,
        stats,
        request: LoadedFor {
            filters: filters.clone(),
            search: search.clone(),
            page,
        },
    })
}

impl ScreenSession {
    pub fn new(id: impl Into<String>, spec: &'static EntitySpec) -> Self {
        Self {
            id: id.into(),
            spec,
            filters: FilterState::new(),
            search: SearchState::default(),
            page: PageRequest::first(),
            sequencer: Sequencer::default(),
            loaded: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &'static EntitySpec {
        self.spec
    }

    pub fn page(&self) -> PageRequest {
        self.page
    }

    pub fn loaded(&self) -> Option<&Loaded> {
        self.loaded.as_ref()
    }

    pub fn error(&self) -> Option<&ScreenErrorState> {
        self.error.as_ref()
    }

    /// True when the loaded rows no longer answer the current query state.
    pub fn is_stale(&self) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|l| !l.answers(&self.filters, &self.search, self.page))
    }

    pub fn view(&self) -> ScreenView<'_> {
        let loaded = self.loaded();
        let page = self.page();
        let total = loaded.map(|l| l.result.total_count).unwrap_or(0);
        ScreenView {
            screen_id: &self.id,
            entity: self.spec.name,
            search: &self.search,
            filters: &self.filters,
            page: PageView {
                number: page.number,
                size: page.size,
                total_pages: page.total_pages(total),
            },
            result: loaded,
            result_stale: self.is_stale(),
            stats: loaded.map(|l| &l.stats),
            error: self.error(),
        }
    }

    pub fn begin(&mut self) -> Ticket {
        self.sequencer.issue()
    }

    /// Applies a finished fetch. Outcomes of superseded tickets are dropped.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        outcome: Result<Loaded, QueryError>,
    ) -> Result<(), QueryError> {
        if !self.sequencer.is_latest(ticket) {
            tracing::debug!(screen = %self.id, ticket = ticket.0, "stale fetch dropped");
            return Ok(());
        }
        match outcome {
            Ok(loaded) => {
                self.loaded = Some(loaded);
                self.error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(screen = %self.id, entity = self.spec.name, error = %e, "fetch failed");
                if e.is_retryable() {
                    self.error = Some(ScreenErrorState {
                        code: e.code(),
                        message: e.to_string(),
                        retryable: true,
                    });
                }
                Err(e)
            }
        }
    }

    /// Re-runs the current query; also serves as the manual retry.
    pub fn refresh(&mut self, store: &dyn DataStore, scope: StatsScope) -> Result<(), QueryError> {
        let ticket = self.begin();
        let outcome = load(store, self.spec, &self.filters, &self.search, self.page, scope);
        self.complete(ticket, outcome)
    }

    pub fn set_search(&mut self, term: &str) {
        self.search = SearchState::new(term);
        self.page = PageRequest::first();
    }

    /// Merges a partial filter update. Invalid filters are rejected without
    /// touching the current state.
    pub fn set_filters(&mut self, patch: &FilterPatch) -> Result<(), QueryError> {
        let next = self.filters.with_patch(patch);
        ListQuery::build(self.spec, &next, &self.search)?;
        self.filters = next;
        self.page = PageRequest::first();
        Ok(())
    }

    pub fn on_search(
        &mut self,
        store: &dyn DataStore,
        scope: StatsScope,
        term: &str,
    ) -> Result<(), QueryError> {
        self.set_search(term);
        self.refresh(store, scope)
    }

    pub fn on_filter_change(
        &mut self,
        store: &dyn DataStore,
        scope: StatsScope,
        patch: &FilterPatch,
    ) -> Result<(), QueryError> {
        self.set_filters(patch)?;
        self.refresh(store, scope)
    }

    pub fn on_page_change(
        &mut self,
        store: &dyn DataStore,
        scope: StatsScope,
        number: i64,
    ) -> Result<(), QueryError> {
        self.page = PageRequest::new(number)?;
        self.refresh(store, scope)
    }

    /// Deletes a row and refetches. A failed delete leaves the loaded page,
    /// count and stats untouched.
    pub fn on_delete(
        &mut self,
        store: &dyn DataStore,
        scope: StatsScope,
        id: i64,
    ) -> Result<(), DeleteError> {
        engine::delete_one(store, self.spec, id)?;

        // Refetch failures become the screen's error state; the delete itself stands.
        if self.refresh(store, scope).is_err() {
            return Ok(());
        }
        let emptied = self
            .loaded
            .as_ref()
            .map(|l| l.result.rows.is_empty() && l.result.total_count > 0)
            .unwrap_or(false);
        if emptied && self.page.number > 1 {
            let total = self.loaded.as_ref().map(|l| l.result.total_count).unwrap_or(0);
            let last = self.page.total_pages(total) as i64;
            if let Ok(page) = PageRequest::new(last) {
                self.page = page;
                let _ = self.refresh(store, scope);
            }
        }
        Ok(())
    }

    /// CSV of the rows currently on screen.
    pub fn on_export(&self, format: CsvFormat, prefix: &str) -> Result<ExportFile, ExportError> {
        let rows = self
            .loaded
            .as_ref()
            .map(|l| l.result.rows.as_slice())
            .unwrap_or(&[]);
        let csv = export::export_csv(self.spec, rows, format)?;
        Ok(ExportFile {
            file_name: export::file_name(prefix, self.spec, self.page.number),
            csv,
            row_count: rows.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::engine::tests::{seed_students, RecordingStore};
    use crate::entity::{CLASSES, STUDENTS};
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use serde_json::json;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        seed_students(&conn);
        conn
    }

    fn patch(v: serde_json::Value) -> FilterPatch {
        FilterPatch::from_json(&v).expect("patch")
    }

    #[test]
    fn sequencer_only_accepts_latest_ticket() {
        let mut seq = Sequencer::default();
        let a = seq.issue();
        let b = seq.issue();
        assert!(!seq.is_latest(a));
        assert!(seq.is_latest(b));
    }

    #[test]
    fn stale_response_cannot_overwrite_newer_one() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);

        let slow = screen.begin();
        let fast = screen.begin();
        let newer = load(
            &store,
            &STUDENTS,
            &FilterState::new(),
            &SearchState::new("Aluno 2"),
            PageRequest::first(),
            StatsScope::Page,
        )
        .expect("newer");
        let older = load(
            &store,
            &STUDENTS,
            &FilterState::new(),
            &SearchState::default(),
            PageRequest::first(),
            StatsScope::Page,
        )
        .expect("older");

        screen.complete(fast, Ok(newer.clone())).expect("apply");
        screen.complete(slow, Ok(older)).expect("ignored");
        assert_eq!(screen.loaded(), Some(&newer));
    }

    #[test]
    fn search_and_filter_changes_reset_to_first_page() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);

        screen.on_page_change(&store, StatsScope::Page, 3).expect("page 3");
        assert_eq!(screen.page().number, 3);
        assert_eq!(screen.loaded().map(|l| l.result.rows.len()), Some(5));

        screen.on_search(&store, StatsScope::Page, "aluno").expect("search");
        assert_eq!(screen.page().number, 1);
        assert_eq!(screen.loaded().map(|l| l.result.rows.len()), Some(10));

        screen.on_page_change(&store, StatsScope::Page, 2).expect("page 2");
        screen
            .on_filter_change(&store, StatsScope::Page, &patch(json!({ "status": "Ativo" })))
            .expect("filter");
        assert_eq!(screen.page().number, 1);
        let loaded = screen.loaded().expect("loaded");
        assert_eq!(loaded.result.total_count, 12);
        assert_eq!(loaded.stats.counts["active"], 10);
    }

    #[test]
    fn filtered_scope_projects_whole_result_set() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        screen
            .on_filter_change(&store, StatsScope::Filtered, &patch(json!({ "status": "Ativo" })))
            .expect("filter");
        let loaded = screen.loaded().expect("loaded");
        assert_eq!(loaded.result.rows.len(), 10);
        assert_eq!(loaded.stats.counts["active"], 12);
        assert_eq!(loaded.stats.sample_size, 12);
    }

    #[test]
    fn invalid_filter_leaves_state_untouched() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        screen.on_page_change(&store, StatsScope::Page, 2).expect("page 2");

        let e = screen
            .on_filter_change(&store, StatsScope::Page, &patch(json!({ "nickname": "x" })))
            .expect_err("invalid");
        assert_eq!(e.code(), "invalid_filter");
        assert_eq!(screen.page().number, 2);
        assert!(screen.error().is_none());
    }

    #[test]
    fn remote_failure_sets_retryable_error_state() {
        let failing = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        assert!(screen.refresh(&failing, StatsScope::Page).is_err());
        let err = screen.error().expect("error state");
        assert_eq!(err.code, "db_query_failed");
        assert!(err.retryable);

        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        screen.refresh(&store, StatsScope::Page).expect("retry");
        assert!(screen.error().is_none());
    }

    #[test]
    fn failed_refetch_marks_kept_rows_stale() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let failing = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        screen.refresh(&store, StatsScope::Page).expect("load");
        assert!(!screen.is_stale());
        let before = screen.loaded().cloned();

        assert!(screen.on_search(&failing, StatsScope::Page, "Aluno 2").is_err());
        assert!(screen.is_stale());
        assert_eq!(screen.loaded().cloned(), before);
        let view = serde_json::to_value(screen.view()).expect("view");
        assert_eq!(view["resultStale"], json!(true));
        assert_eq!(view["search"], json!("Aluno 2"));
        assert_eq!(view["error"]["retryable"], json!(true));

        screen.refresh(&store, StatsScope::Page).expect("retry");
        assert!(!screen.is_stale());
        let view = serde_json::to_value(screen.view()).expect("view");
        assert_eq!(view["resultStale"], json!(false));
        assert_eq!(view["error"], json!(null));
    }

    #[test]
    fn failed_delete_keeps_current_page() {
        let conn = memory_db();
        conn.execute("INSERT INTO classes(id, name, status) VALUES(1, 'Turma A', 'Ativo')", [])
            .expect("class");
        conn.execute("INSERT INTO class_enrollments(class_id, student_id) VALUES(1, 1)", [])
            .expect("enroll");
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &CLASSES);
        screen.refresh(&store, StatsScope::Page).expect("load");
        let before = screen.loaded().cloned();

        let e = screen.on_delete(&store, StatsScope::Page, 1).expect_err("blocked");
        assert_eq!(e.code(), "has_dependents");
        assert_eq!(screen.loaded().cloned(), before);
    }

    #[test]
    fn deleting_last_row_of_last_page_steps_back() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        screen
            .on_filter_change(&store, StatsScope::Page, &patch(json!({ "status": "Inativo" })))
            .expect("filter");
        screen.on_page_change(&store, StatsScope::Page, 2).expect("page 2");
        // Inactive students are 13..=25; page 2 holds only #23..#25.
        for id in [23, 24, 25] {
            screen.on_delete(&store, StatsScope::Page, id).expect("delete");
        }
        assert_eq!(screen.page().number, 1);
        assert_eq!(screen.loaded().map(|l| l.result.total_count), Some(10));
    }

    #[test]
    fn export_uses_loaded_page_only() {
        let conn = memory_db();
        let store = SqliteStore::new(&conn);
        let mut screen = ScreenSession::new("s1", &STUDENTS);
        assert_eq!(
            screen
                .on_export(CsvFormat::default(), "export")
                .err()
                .map(|e| e.code()),
            Some("empty_page")
        );

        screen.refresh(&store, StatsScope::Page).expect("load");
        let file = screen.on_export(CsvFormat::default(), "painel").expect("export");
        assert_eq!(file.row_count, 10);
        assert_eq!(file.csv.lines().count(), 11);
        assert_eq!(file.file_name, "painel-students-p1.csv");
    }
}
