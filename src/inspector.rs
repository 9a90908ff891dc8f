use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, info, trace, warn};

use crate::service::{Decision, Record, ServiceError, TableService};

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("failed to load table metadata: {0}")]
    Load(#[source] ServiceError),
    #[error("failed to load record {index}: {source}")]
    Reload {
        index: usize,
        #[source]
        source: ServiceError,
    },
    #[error("failed to store decision '{decision}' for record {index}: {source}")]
    Persist {
        index: usize,
        decision: Decision,
        #[source]
        source: ServiceError,
    },
    #[error("inspector is not initialized")]
    NotReady,
}

/// Completion of a piece of asynchronous work, handed back to [`Inspector::apply`].
#[derive(Debug)]
pub enum InspectorEvent {
    Initialized {
        pending_index: Option<usize>,
        result: Result<(usize, Vec<String>), ServiceError>,
    },
    ViewLoaded {
        generation: u64,
        index: usize,
        result: Result<(Record, Vec<Record>), ServiceError>,
    },
    DecisionPersisted {
        index: usize,
        decision: Decision,
        reload: bool,
        result: Result<(), ServiceError>,
    },
}

/// What applying an event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Initialized,
    ViewLoaded(usize),
    /// A reload that was superseded by a newer one. Its result was dropped.
    Stale(usize),
    DecisionPersisted(usize),
}

#[derive(Debug)]
struct View {
    size: usize,
    cursor: usize,
    column_names: Vec<String>,
    current: Option<Record>,
    related: Vec<Record>,
}

/// Single record inspector over a [`TableService`].
///
/// All service calls are spawned onto the tokio runtime, none of the public
/// operations wait for them. Completed calls come back as [`InspectorEvent`]s
/// which the host feeds into [`Inspector::apply`], so every state change
/// happens on the host's task.
///
/// Every reload is tagged with a generation. Only the result of the latest
/// reload is applied, late results for an abandoned cursor are discarded.
pub struct Inspector {
    service: Arc<dyn TableService>,
    events_tx: UnboundedSender<InspectorEvent>,
    events_rx: UnboundedReceiver<InspectorEvent>,
    view: Option<View>,
    generation: u64,
    in_flight: usize,
}

impl Inspector {
    pub fn new(service: Arc<dyn TableService>) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            service,
            events_tx,
            events_rx,
            view: None,
            generation: 0,
            in_flight: 0,
        }
    }

    /// Fetches size and related column names, then loads the record at
    /// `pending_index` (or the first one).
    pub fn initialize(&mut self, pending_index: Option<usize>) {
        debug!("Initializing inspector, pending index {pending_index:?}");
        let service = Arc::clone(&self.service);
        self.spawn_tracked(
            async move { tokio::try_join!(service.size(), service.related_column_names()) },
            move |result| InspectorEvent::Initialized {
                pending_index,
                result,
            },
        );
    }

    /// Moves the cursor and reloads the view. The index is taken as is.
    pub fn set_cursor(&mut self, index: usize) {
        let Some(view) = self.view.as_mut() else {
            warn!("Ignoring cursor change to {index}, inspector is not initialized");
            return;
        };
        // An empty table has no valid cursor, the reload only clears the view.
        if view.size > 0 {
            view.cursor = index;
        }
        self.reload();
    }

    /// Stores `decision` for the current record.
    ///
    /// Unless the cursor is on the last record, the cursor advances right
    /// away. On the last record the view is reloaded once the decision was
    /// stored, successfully or not.
    pub fn submit_decision(&mut self, decision: Decision) -> Result<(), InspectorError> {
        let view = self.view.as_ref().ok_or(InspectorError::NotReady)?;
        let index = view.cursor;
        let advance = index < view.size.saturating_sub(1);

        debug!("Submitting decision '{decision}' for {index}, advance: {advance}");
        let service = Arc::clone(&self.service);
        let persisted = decision.clone();
        self.spawn_tracked(
            async move { service.persist_decision(index, &persisted).await },
            move |result| InspectorEvent::DecisionPersisted {
                index,
                decision,
                reload: !advance,
                result,
            },
        );

        if advance {
            self.set_cursor(index + 1);
        }
        Ok(())
    }

    pub fn apply(&mut self, event: InspectorEvent) -> Result<Applied, InspectorError> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match event {
            InspectorEvent::Initialized {
                pending_index,
                result,
            } => {
                let (size, column_names) = result.map_err(InspectorError::Load)?;
                let cursor = pending_index.unwrap_or(0);
                info!(
                    "Inspector ready: {size} records, {} related columns, cursor {cursor}",
                    column_names.len()
                );
                self.view = Some(View {
                    size,
                    cursor,
                    column_names,
                    current: None,
                    related: Vec::new(),
                });
                self.reload();
                Ok(Applied::Initialized)
            }
            InspectorEvent::ViewLoaded {
                generation,
                index,
                result,
            } => {
                if generation != self.generation {
                    debug!(
                        "Discarding stale view for {index} (generation {generation}, current {})",
                        self.generation
                    );
                    return Ok(Applied::Stale(index));
                }
                let (record, related) =
                    result.map_err(|source| InspectorError::Reload { index, source })?;
                let Some(view) = self.view.as_mut() else {
                    return Ok(Applied::Stale(index));
                };
                trace!("View for {index} loaded, {} related records", related.len());
                view.current = Some(record);
                view.related = related;
                Ok(Applied::ViewLoaded(index))
            }
            InspectorEvent::DecisionPersisted {
                index,
                decision,
                reload,
                result,
            } => {
                if reload {
                    self.reload();
                }
                match result {
                    Ok(()) => {
                        info!("Stored decision '{decision}' for {index}");
                        Ok(Applied::DecisionPersisted(index))
                    }
                    Err(source) => Err(InspectorError::Persist {
                        index,
                        decision,
                        source,
                    }),
                }
            }
        }
    }

    /// Waits for the next completed piece of work. Cancel safe.
    pub async fn next_event(&mut self) -> Option<InspectorEvent> {
        self.events_rx.recv().await
    }

    /// Applies events until no tracked work is in flight. Returns the errors
    /// encountered on the way.
    pub async fn settle(&mut self) -> Vec<InspectorError> {
        let mut errors = Vec::new();
        while self.in_flight > 0 {
            let Some(event) = self.next_event().await else {
                break;
            };
            if let Err(e) = self.apply(event) {
                errors.push(e);
            }
        }
        errors
    }

    pub fn is_ready(&self) -> bool {
        self.view.is_some()
    }

    pub fn size(&self) -> Option<usize> {
        self.view.as_ref().map(|v| v.size)
    }

    pub fn cursor(&self) -> Option<usize> {
        self.view.as_ref().map(|v| v.cursor)
    }

    pub fn column_names(&self) -> &[String] {
        self.view
            .as_ref()
            .map(|v| v.column_names.as_slice())
            .unwrap_or_default()
    }

    pub fn current_record(&self) -> Option<&Record> {
        self.view.as_ref().and_then(|v| v.current.as_ref())
    }

    pub fn related_records(&self) -> &[Record] {
        self.view
            .as_ref()
            .map(|v| v.related.as_slice())
            .unwrap_or_default()
    }

    /// Number of spawned calls whose events have not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn reload(&mut self) {
        // Bumped on every reload so that anything issued earlier is stale.
        self.generation += 1;
        let Some(view) = self.view.as_mut() else {
            warn!("Reload requested before initialization");
            return;
        };
        if view.size == 0 {
            view.current = None;
            view.related.clear();
            return;
        }
        let index = view.cursor;
        let generation = self.generation;
        trace!("Reloading view for {index}, generation {generation}");

        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            if let Err(e) = service.schedule_snapshot(index).await {
                debug!("Scheduling snapshot for {index} failed: {e}");
            }
        });

        let service = Arc::clone(&self.service);
        self.spawn_tracked(
            async move { tokio::try_join!(service.table_row(index), service.related_calls(index)) },
            move |result| InspectorEvent::ViewLoaded {
                generation,
                index,
                result,
            },
        );
    }

    /// Runs `work` on its own task and delivers exactly one event for it,
    /// built by `event`. A service call that panics is reported as a
    /// [`ServiceError::Backend`] so the work never stays in flight.
    fn spawn_tracked<T, W, E>(&mut self, work: W, event: E)
    where
        T: Send + 'static,
        W: Future<Output = Result<T, ServiceError>> + Send + 'static,
        E: FnOnce(Result<T, ServiceError>) -> InspectorEvent + Send + 'static,
    {
        let events = self.events_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Service call did not complete: {e}");
                    Err(ServiceError::Backend(format!("service call did not complete: {e}")))
                }
            };
            let _ = events.send(event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Size,
        ColumnNames,
        Row(usize),
        Related(usize),
        Snapshot(usize),
        Persist(usize, String),
    }

    #[derive(Default)]
    struct MockService {
        size: usize,
        fail_init: bool,
        fail_persist: bool,
        panic_persist: bool,
        fail_snapshots: bool,
        fail_rows: Mutex<HashSet<usize>>,
        row_gates: Mutex<HashMap<usize, oneshot::Receiver<()>>>,
        persist_gate: Mutex<Option<oneshot::Receiver<()>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl MockService {
        fn new(size: usize) -> Self {
            Self {
                size,
                ..Default::default()
            }
        }

        fn failing_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        fn failing_persist(mut self) -> Self {
            self.fail_persist = true;
            self
        }

        fn panicking_persist(mut self) -> Self {
            self.panic_persist = true;
            self
        }

        fn failing_snapshots(mut self) -> Self {
            self.fail_snapshots = true;
            self
        }

        fn position(&self, call: &Call) -> Option<usize> {
            self.calls().iter().position(|c| c == call)
        }

        fn fail_row(&self, index: usize) {
            self.fail_rows.lock().unwrap().insert(index);
        }

        /// Holds back the row lookup for `index` until the sender fires.
        fn gate_row(&self, index: usize) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.row_gates.lock().unwrap().insert(index, rx);
            tx
        }

        fn gate_persist(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.persist_gate.lock().unwrap() = Some(rx);
            tx
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &Call) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }

        fn persists(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Persist(..)))
                .collect()
        }

        fn row_fetches(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Row(_) | Call::Related(_)))
                .count()
        }

        fn check_index(&self, index: usize) -> Result<(), ServiceError> {
            if index >= self.size {
                return Err(ServiceError::IndexOutOfRange {
                    index,
                    size: self.size,
                });
            }
            Ok(())
        }
    }

    fn row(index: usize) -> Record {
        Record::new().with("id", Some(index.to_string()))
    }

    fn related(index: usize) -> Vec<Record> {
        (0..2)
            .map(|n| {
                Record::new()
                    .with("id", Some(index.to_string()))
                    .with("call", Some(format!("{index}-{n}")))
            })
            .collect()
    }

    #[async_trait]
    impl TableService for MockService {
        async fn size(&self) -> Result<usize, ServiceError> {
            self.record(Call::Size);
            if self.fail_init {
                return Err(ServiceError::Backend("size unavailable".into()));
            }
            Ok(self.size)
        }

        async fn related_column_names(&self) -> Result<Vec<String>, ServiceError> {
            self.record(Call::ColumnNames);
            Ok(vec!["id".into(), "call".into()])
        }

        async fn table_row(&self, index: usize) -> Result<Record, ServiceError> {
            self.record(Call::Row(index));
            let gate = { self.row_gates.lock().unwrap().remove(&index) };
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.check_index(index)?;
            if self.fail_rows.lock().unwrap().contains(&index) {
                return Err(ServiceError::Backend(format!("row {index} unavailable")));
            }
            Ok(row(index))
        }

        async fn related_calls(&self, index: usize) -> Result<Vec<Record>, ServiceError> {
            self.record(Call::Related(index));
            self.check_index(index)?;
            Ok(related(index))
        }

        async fn schedule_snapshot(&self, index: usize) -> Result<(), ServiceError> {
            self.record(Call::Snapshot(index));
            if self.fail_snapshots {
                return Err(ServiceError::Backend("snapshot queue full".into()));
            }
            Ok(())
        }

        async fn persist_decision(
            &self,
            index: usize,
            decision: &Decision,
        ) -> Result<(), ServiceError> {
            self.record(Call::Persist(index, decision.to_string()));
            let gate = { self.persist_gate.lock().unwrap().take() };
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.panic_persist {
                panic!("persist crashed for {index}");
            }
            if self.fail_persist {
                return Err(ServiceError::Backend("write rejected".into()));
            }
            Ok(())
        }
    }

    async fn ready(service: &Arc<MockService>, pending_index: Option<usize>) -> Inspector {
        let mut inspector = Inspector::new(service.clone());
        inspector.initialize(pending_index);
        let errors = inspector.settle().await;
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        inspector
    }

    fn current_id(inspector: &Inspector) -> Option<&str> {
        inspector.current_record().and_then(|r| r.get("id"))
    }

    async fn yield_a_few() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn initialize_loads_metadata_and_first_record() {
        let service = Arc::new(MockService::new(5));
        let inspector = ready(&service, None).await;

        assert!(inspector.is_ready());
        assert_eq!(inspector.size(), Some(5));
        assert_eq!(inspector.cursor(), Some(0));
        assert_eq!(inspector.column_names(), ["id", "call"]);
        assert_eq!(current_id(&inspector), Some("0"));
        assert_eq!(inspector.related_records(), related(0).as_slice());
        assert_eq!(service.count(&Call::Size), 1);
        assert_eq!(service.count(&Call::ColumnNames), 1);
        assert_eq!(service.count(&Call::Snapshot(0)), 1);
    }

    #[tokio::test]
    async fn initialize_starts_at_pending_index() {
        let service = Arc::new(MockService::new(5));
        let inspector = ready(&service, Some(3)).await;

        assert_eq!(inspector.cursor(), Some(3));
        assert_eq!(current_id(&inspector), Some("3"));
        assert_eq!(service.count(&Call::Row(0)), 0);
    }

    #[tokio::test]
    async fn initialize_with_empty_table_fetches_no_rows() {
        let service = Arc::new(MockService::new(0));
        let inspector = ready(&service, None).await;

        assert_eq!(inspector.size(), Some(0));
        assert_eq!(inspector.cursor(), Some(0));
        assert!(inspector.current_record().is_none());
        assert!(inspector.related_records().is_empty());
        assert_eq!(service.row_fetches(), 0);
        assert_eq!(service.count(&Call::Snapshot(0)), 0);
    }

    #[tokio::test]
    async fn failed_initialization_applies_nothing() {
        let service = Arc::new(MockService::new(5).failing_init());
        let mut inspector = Inspector::new(service.clone());
        inspector.initialize(Some(2));
        let errors = inspector.settle().await;

        assert!(matches!(errors.as_slice(), [InspectorError::Load(_)]));
        assert!(!inspector.is_ready());
        assert_eq!(inspector.size(), None);
        assert_eq!(inspector.cursor(), None);
        assert!(inspector.column_names().is_empty());
        assert_eq!(service.row_fetches(), 0);
    }

    #[tokio::test]
    async fn set_cursor_loads_view_for_that_index() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;

        for index in [4, 1, 2] {
            inspector.set_cursor(index);
            assert!(inspector.settle().await.is_empty());
            let expected = index.to_string();
            assert_eq!(current_id(&inspector), Some(expected.as_str()));
            assert_eq!(inspector.related_records(), related(index).as_slice());
            assert_eq!(service.count(&Call::Snapshot(index)), 1);
        }
    }

    #[tokio::test]
    async fn set_cursor_on_empty_table_keeps_record_absent() {
        let service = Arc::new(MockService::new(0));
        let mut inspector = ready(&service, None).await;

        inspector.set_cursor(3);
        inspector.set_cursor(0);
        assert!(inspector.settle().await.is_empty());

        assert_eq!(inspector.cursor(), Some(0));
        assert!(inspector.current_record().is_none());
        assert!(inspector.related_records().is_empty());
        assert_eq!(service.row_fetches(), 0);
    }

    #[tokio::test]
    async fn set_cursor_before_initialize_is_ignored() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = Inspector::new(service.clone());

        inspector.set_cursor(2);
        assert_eq!(inspector.in_flight(), 0);
        assert!(inspector.settle().await.is_empty());
        assert_eq!(inspector.cursor(), None);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn decision_advances_without_waiting_for_persist() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, Some(2)).await;
        let release = service.gate_persist();

        inspector.submit_decision(Decision::new("accept")).unwrap();
        assert_eq!(inspector.cursor(), Some(3));

        // The persist is still held back, the view for 3 arrives first.
        let event = inspector.next_event().await.unwrap();
        assert_eq!(inspector.apply(event).unwrap(), Applied::ViewLoaded(3));
        assert_eq!(current_id(&inspector), Some("3"));
        assert_eq!(inspector.related_records(), related(3).as_slice());

        release.send(()).unwrap();
        assert!(inspector.settle().await.is_empty());
        assert_eq!(service.persists(), vec![Call::Persist(2, "accept".into())]);
        assert_eq!(inspector.cursor(), Some(3));
    }

    #[tokio::test]
    async fn decision_on_last_record_reloads_after_persist() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, Some(4)).await;
        let fetched = service.count(&Call::Row(4));
        let release = service.gate_persist();

        inspector.submit_decision(Decision::new("reject")).unwrap();
        assert_eq!(inspector.cursor(), Some(4));

        yield_a_few().await;
        assert_eq!(service.persists(), vec![Call::Persist(4, "reject".into())]);
        assert_eq!(service.count(&Call::Row(4)), fetched);

        release.send(()).unwrap();
        let event = inspector.next_event().await.unwrap();
        assert_eq!(inspector.apply(event).unwrap(), Applied::DecisionPersisted(4));
        assert!(inspector.settle().await.is_empty());

        assert_eq!(service.count(&Call::Row(4)), fetched + 1);
        assert_eq!(inspector.cursor(), Some(4));
        assert_eq!(current_id(&inspector), Some("4"));
    }

    #[tokio::test]
    async fn failed_persist_on_last_record_still_reloads() {
        let service = Arc::new(MockService::new(3).failing_persist());
        let mut inspector = ready(&service, Some(2)).await;
        let fetched = service.count(&Call::Row(2));

        inspector.submit_decision(Decision::declined()).unwrap();
        let errors = inspector.settle().await;

        assert!(matches!(
            errors.as_slice(),
            [InspectorError::Persist { index: 2, .. }]
        ));
        assert_eq!(service.count(&Call::Row(2)), fetched + 1);
        assert_eq!(inspector.cursor(), Some(2));
    }

    #[tokio::test]
    async fn failed_persist_keeps_optimistic_advance() {
        let service = Arc::new(MockService::new(3).failing_persist());
        let mut inspector = ready(&service, None).await;

        inspector.submit_decision(Decision::approved()).unwrap();
        let errors = inspector.settle().await;

        assert!(matches!(
            errors.as_slice(),
            [InspectorError::Persist { index: 0, .. }]
        ));
        assert_eq!(inspector.cursor(), Some(1));
        assert_eq!(current_id(&inspector), Some("1"));
    }

    #[tokio::test]
    async fn each_submission_persists_once_at_its_own_cursor() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;

        for _ in 0..3 {
            inspector.submit_decision(Decision::maybe()).unwrap();
        }
        assert_eq!(inspector.cursor(), Some(3));
        assert!(inspector.settle().await.is_empty());

        assert_eq!(
            service.persists(),
            vec![
                Call::Persist(0, "maybe".into()),
                Call::Persist(1, "maybe".into()),
                Call::Persist(2, "maybe".into()),
            ]
        );
        assert_eq!(current_id(&inspector), Some("3"));
    }

    #[tokio::test]
    async fn late_view_for_abandoned_cursor_is_discarded() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;
        let release = service.gate_row(1);

        inspector.set_cursor(1);
        inspector.set_cursor(2);

        let event = inspector.next_event().await.unwrap();
        assert_eq!(inspector.apply(event).unwrap(), Applied::ViewLoaded(2));

        release.send(()).unwrap();
        let event = inspector.next_event().await.unwrap();
        assert_eq!(inspector.apply(event).unwrap(), Applied::Stale(1));

        assert_eq!(inspector.cursor(), Some(2));
        assert_eq!(current_id(&inspector), Some("2"));
        assert_eq!(inspector.related_records(), related(2).as_slice());
        assert_eq!(inspector.in_flight(), 0);
    }

    #[tokio::test]
    async fn repeated_set_cursor_ends_in_same_view() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;

        inspector.set_cursor(3);
        inspector.set_cursor(3);
        assert!(inspector.settle().await.is_empty());

        assert_eq!(service.count(&Call::Row(3)), 2);
        assert_eq!(current_id(&inspector), Some("3"));
        assert_eq!(inspector.related_records(), related(3).as_slice());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_view() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;
        service.fail_row(1);

        inspector.set_cursor(1);
        let errors = inspector.settle().await;

        assert!(matches!(
            errors.as_slice(),
            [InspectorError::Reload { index: 1, .. }]
        ));
        assert_eq!(inspector.cursor(), Some(1));
        assert_eq!(current_id(&inspector), Some("0"));
        assert_eq!(inspector.related_records(), related(0).as_slice());
    }

    #[tokio::test]
    async fn cursor_is_not_clamped_by_navigation() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;

        inspector.set_cursor(7);
        let errors = inspector.settle().await;

        assert_eq!(inspector.cursor(), Some(7));
        assert!(matches!(
            errors.as_slice(),
            [InspectorError::Reload {
                index: 7,
                source: ServiceError::IndexOutOfRange { index: 7, size: 5 }
            }]
        ));
    }

    #[tokio::test]
    async fn submit_before_initialize_is_rejected() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = Inspector::new(service.clone());

        let result = inspector.submit_decision(Decision::approved());
        assert!(matches!(result, Err(InspectorError::NotReady)));
        yield_a_few().await;
        assert!(service.persists().is_empty());
    }

    #[tokio::test]
    async fn decision_on_empty_table_waits_and_stays() {
        let service = Arc::new(MockService::new(0));
        let mut inspector = ready(&service, None).await;

        inspector.submit_decision(Decision::approved()).unwrap();
        assert_eq!(inspector.cursor(), Some(0));
        assert!(inspector.settle().await.is_empty());

        assert_eq!(service.persists(), vec![Call::Persist(0, "approved".into())]);
        assert!(inspector.current_record().is_none());
        assert_eq!(service.row_fetches(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_requested_before_the_record() {
        let service = Arc::new(MockService::new(5));
        let mut inspector = ready(&service, None).await;
        inspector.set_cursor(3);
        assert!(inspector.settle().await.is_empty());

        for index in [0, 3] {
            let snapshot = service.position(&Call::Snapshot(index)).unwrap();
            assert!(snapshot < service.position(&Call::Row(index)).unwrap());
            assert!(snapshot < service.position(&Call::Related(index)).unwrap());
        }
    }

    #[tokio::test]
    async fn failed_snapshots_are_not_reported() {
        let service = Arc::new(MockService::new(5).failing_snapshots());
        let mut inspector = ready(&service, None).await;

        inspector.set_cursor(2);
        assert!(inspector.settle().await.is_empty());
        assert_eq!(service.count(&Call::Snapshot(2)), 1);
        assert_eq!(current_id(&inspector), Some("2"));
        assert_eq!(inspector.related_records(), related(2).as_slice());
        assert_eq!(inspector.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_persist_is_reported_and_settles() {
        let service = Arc::new(MockService::new(5).panicking_persist());
        let mut inspector = ready(&service, Some(1)).await;

        inspector.submit_decision(Decision::approved()).unwrap();
        let errors = tokio::time::timeout(Duration::from_secs(2), inspector.settle())
            .await
            .expect("settle must finish after a crashed service call");

        assert!(matches!(
            errors.as_slice(),
            [InspectorError::Persist {
                index: 1,
                source: ServiceError::Backend(_),
                ..
            }]
        ));
        assert_eq!(inspector.in_flight(), 0);
        assert_eq!(inspector.cursor(), Some(2));
        assert_eq!(current_id(&inspector), Some("2"));
    }
}
