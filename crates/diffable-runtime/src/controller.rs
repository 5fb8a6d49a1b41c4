#![forbid(unsafe_code)]

//! The apply controller: sole owner of the current snapshot.
//!
//! Every apply request takes a ticket in a FIFO queue the moment it is
//! issued. When its turn comes it builds the candidate snapshot, diffs it
//! against whatever is current *at that point* (the result of every earlier
//! request), forwards the edit script to the [`Renderer`], and advances the
//! current snapshot. At most one request is in flight at a time.
//!
//! # State machine
//!
//! ```text
//!            ticket served
//!   Idle ─────────────────────▶ Applying
//!    ▲                            │
//!    │   cancelled │ rejected     │ forwarded (sync)
//!    │             │ settled      │ completion (async)
//!    └────────────────────────────┘
//! ```
//!
//! # Cancellation
//!
//! A request's [`CancellationToken`] is checked before the diff and again
//! right before forwarding. A cancelled request discards its edit script and
//! leaves the current snapshot alone; the next request diffs against the last
//! snapshot that was actually applied.
//!
//! # Notices
//!
//! [`ApplyController::subscribe`] yields an [`ApplyNotice`] per request. Each
//! notice is published while the request still holds its turn, so receivers
//! observe them in enqueue order. Blocking applies publish at dispatch; async
//! applies publish once the renderer signals completion.
//!
//! # Reentrancy
//!
//! A renderer must not issue a blocking apply on the same controller from
//! inside `render_edits`/`render_full_reload`: the calling request still
//! holds the turn.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use diffable_core::{EditScript, Identifiable, IndexPath, SectionKey, Snapshot, SnapshotError, diff};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, field, info_span, warn};
use web_time::Instant;

use crate::cancellation::CancellationToken;
use crate::config::ControllerConfig;
use crate::error::{ApplyError, Result};
use crate::queue::ApplyQueue;
use crate::render::{Completion, RenderUpdate, Renderer};

/// How a transition was forwarded to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Edit script, animated.
    Animated,
    /// Edit script, no animation.
    Immediate,
    /// Discard and rebuild from the snapshot.
    FullReload,
}

impl RenderMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Animated => "animated",
            Self::Immediate => "immediate",
            Self::FullReload => "full_reload",
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Animate the transition. `None` uses the controller's default.
    pub animated: Option<bool>,
    /// Cooperative cancellation for this request.
    pub cancellation: Option<CancellationToken>,
}

impl ApplyOptions {
    #[must_use]
    pub fn new(animated: bool) -> Self {
        Self {
            animated: Some(animated),
            cancellation: None,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// What an applied request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport<S, I> {
    /// Queue sequence, in enqueue order.
    pub sequence: u64,
    pub mode: RenderMode,
    /// The computed edit script. `None` when the diff was skipped.
    pub script: Option<EditScript<S, I>>,
    /// Time from dequeue to dispatch (blocking) or completion (async).
    pub elapsed_us: u64,
}

/// Result of a request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome<S, I> {
    Applied(ApplyReport<S, I>),
    /// Cancelled before forwarding; the current snapshot did not change.
    Cancelled { sequence: u64 },
}

impl<S, I> ApplyOutcome<S, I> {
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Applied(report) => report.sequence,
            Self::Cancelled { sequence } => *sequence,
        }
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    #[must_use]
    pub fn report(&self) -> Option<&ApplyReport<S, I>> {
        match self {
            Self::Applied(report) => Some(report),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Completion notification for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyNotice {
    pub sequence: u64,
    pub status: NoticeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeStatus {
    /// Forwarded and settled. `changes` is `None` when no diff was computed.
    Applied {
        changes: Option<usize>,
        mode: RenderMode,
    },
    Cancelled,
    /// The candidate snapshot could not be built.
    Rejected,
}

enum Plan {
    Diff { animated: bool },
    FullReload,
}

struct Forwarded<S, I> {
    mode: RenderMode,
    script: Option<EditScript<S, I>>,
    settled: Option<oneshot::Receiver<()>>,
}

/// Serializes apply requests and owns the current snapshot.
pub struct ApplyController<S, V: Identifiable> {
    renderer: Arc<dyn Renderer<S, V>>,
    config: ControllerConfig,
    current: Mutex<Arc<Snapshot<S, V>>>,
    queue: ApplyQueue,
    notices: broadcast::Sender<ApplyNotice>,
}

impl<S: fmt::Debug, V: Identifiable> fmt::Debug for ApplyController<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyController")
            .field("config", &self.config)
            .field("pending", &self.queue.pending())
            .finish_non_exhaustive()
    }
}

type Outcome<S, V> = ApplyOutcome<S, <V as Identifiable>::Id>;

impl<S, V> ApplyController<S, V>
where
    S: SectionKey + Send + Sync + 'static,
    V: Identifiable + PartialEq + Clone + Send + Sync + 'static,
    V::Id: Send + Sync,
{
    /// Controller with the default configuration and an empty snapshot.
    pub fn new(renderer: Arc<dyn Renderer<S, V>>) -> Self {
        Self::with_config(renderer, ControllerConfig::default())
    }

    pub fn with_config(renderer: Arc<dyn Renderer<S, V>>, config: ControllerConfig) -> Self {
        let problems = config.validate();
        if !problems.is_empty() {
            warn!(target: "diffable.apply", ?problems, "controller config has invalid values");
        }
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        Self {
            renderer,
            config,
            current: Mutex::new(Arc::new(Snapshot::new())),
            queue: ApplyQueue::new(),
            notices,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Subscribe to completion notices of requests settled from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApplyNotice> {
        self.notices.subscribe()
    }

    /// Requests issued but not yet settled.
    #[must_use]
    pub fn pending_requests(&self) -> u64 {
        self.queue.pending()
    }

    // ====================================================================
    // Reads
    // ====================================================================

    /// Copy of the most recently applied snapshot. Never partially applied.
    #[must_use]
    pub fn current_snapshot(&self) -> Snapshot<S, V> {
        self.shared_snapshot().as_ref().clone()
    }

    #[must_use]
    pub fn section_identifier(&self, index: usize) -> Option<S> {
        self.shared_snapshot().section_at(index).cloned()
    }

    #[must_use]
    pub fn index_of_section(&self, section: &S) -> Option<usize> {
        self.shared_snapshot().index_of_section(section)
    }

    #[must_use]
    pub fn item_identifier(&self, path: IndexPath) -> Option<V::Id> {
        self.shared_snapshot().item_at(path).cloned()
    }

    #[must_use]
    pub fn index_path_of(&self, id: &V::Id) -> Option<IndexPath> {
        self.shared_snapshot().index_path_of(id)
    }

    #[must_use]
    pub fn item_identifiers_in(&self, section: &S) -> Option<Vec<V::Id>> {
        self.shared_snapshot()
            .item_identifiers_in(section)
            .map(<[V::Id]>::to_vec)
    }

    fn shared_snapshot(&self) -> Arc<Snapshot<S, V>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ====================================================================
    // Blocking applies
    // ====================================================================

    /// Diff `snapshot` against the current one and forward the result.
    ///
    /// Blocks until earlier requests have been dispatched and this one has
    /// been forwarded; does not wait for the renderer's completion.
    pub fn apply(&self, snapshot: Snapshot<S, V>, animated: bool) -> Result<Outcome<S, V>> {
        self.apply_with(snapshot, ApplyOptions::new(animated))
    }

    pub fn apply_with(
        &self,
        snapshot: Snapshot<S, V>,
        options: ApplyOptions,
    ) -> Result<Outcome<S, V>> {
        let plan = self.diff_plan(&options);
        self.run_blocking(move |_| Ok(snapshot), plan, options.cancellation)
    }

    /// Mutate a copy of the snapshot current when this request is dequeued,
    /// then apply it.
    pub fn apply_changes<F>(&self, options: ApplyOptions, change: F) -> Result<Outcome<S, V>>
    where
        F: FnOnce(&mut Snapshot<S, V>) -> Result<(), SnapshotError>,
    {
        let plan = self.diff_plan(&options);
        self.run_blocking(edit_current(change), plan, options.cancellation)
    }

    /// Replace the contents of the named sections, appending any that are
    /// missing, and apply.
    pub fn reset(
        &self,
        sections: impl IntoIterator<Item = (S, Vec<V>)>,
        animated: bool,
    ) -> Result<Outcome<S, V>> {
        let sections: Vec<_> = sections.into_iter().collect();
        self.apply_changes(ApplyOptions::new(animated), replace_sections(sections))
    }

    // ====================================================================
    // Async applies
    // ====================================================================
    //
    // Each of these takes its ticket before returning the future, so call
    // order is enqueue order regardless of when the future is first polled.
    // Dropping the future before its turn abandons the ticket.

    /// Diff, forward, and wait for the renderer to complete the transition.
    pub fn apply_async(
        &self,
        snapshot: Snapshot<S, V>,
        animated: bool,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_ {
        self.apply_async_with(snapshot, ApplyOptions::new(animated))
    }

    pub fn apply_async_with(
        &self,
        snapshot: Snapshot<S, V>,
        options: ApplyOptions,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_ {
        let plan = self.diff_plan(&options);
        self.run_async(move |_| Ok(snapshot), plan, options.cancellation)
    }

    pub fn apply_changes_async<F>(
        &self,
        options: ApplyOptions,
        change: F,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_
    where
        F: FnOnce(&mut Snapshot<S, V>) -> Result<(), SnapshotError> + Send + 'static,
    {
        let plan = self.diff_plan(&options);
        self.run_async(edit_current(change), plan, options.cancellation)
    }

    /// Skip the diff and have the renderer rebuild from `snapshot`.
    pub fn apply_using_full_reload(
        &self,
        snapshot: Snapshot<S, V>,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_ {
        self.apply_using_full_reload_with(snapshot, ApplyOptions::default())
    }

    /// Full reload honouring `options.cancellation`. The animation flag is
    /// ignored.
    pub fn apply_using_full_reload_with(
        &self,
        snapshot: Snapshot<S, V>,
        options: ApplyOptions,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_ {
        self.run_async(move |_| Ok(snapshot), Plan::FullReload, options.cancellation)
    }

    pub fn reset_async(
        &self,
        sections: impl IntoIterator<Item = (S, Vec<V>)>,
        animated: bool,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_ {
        let sections: Vec<_> = sections.into_iter().collect();
        self.apply_changes_async(ApplyOptions::new(animated), replace_sections(sections))
    }

    // ====================================================================
    // Request execution
    // ====================================================================

    fn diff_plan(&self, options: &ApplyOptions) -> Plan {
        Plan::Diff {
            animated: options.animated.unwrap_or(self.config.animate_by_default),
        }
    }

    fn run_blocking<F>(
        &self,
        build: F,
        plan: Plan,
        cancellation: Option<CancellationToken>,
    ) -> Result<Outcome<S, V>>
    where
        F: FnOnce(&Snapshot<S, V>) -> Result<Snapshot<S, V>, SnapshotError>,
    {
        let ticket = self.queue.enqueue();
        ticket.wait_blocking();
        let started = Instant::now();
        let forwarded = self.forward(ticket.sequence(), build, plan, cancellation.as_ref(), false);
        self.finish(ticket.sequence(), forwarded, started)
    }

    fn run_async<F>(
        &self,
        build: F,
        plan: Plan,
        cancellation: Option<CancellationToken>,
    ) -> impl Future<Output = Result<Outcome<S, V>>> + Send + '_
    where
        F: FnOnce(&Snapshot<S, V>) -> Result<Snapshot<S, V>, SnapshotError> + Send + 'static,
    {
        let ticket = self.queue.enqueue();
        async move {
            ticket.wait().await;
            let sequence = ticket.sequence();
            let started = Instant::now();
            let mut forwarded = self.forward(sequence, build, plan, cancellation.as_ref(), true);
            if let Ok(Some(done)) = &mut forwarded
                && let Some(settled) = done.settled.take()
            {
                // An error here means the completion was dropped; already logged.
                let _ = settled.await;
            }
            self.finish(sequence, forwarded, started)
        }
    }

    /// Build, diff, check cancellation, advance, forward. Runs while the
    /// request holds its turn. `Ok(None)` means cancelled.
    fn forward<F>(
        &self,
        sequence: u64,
        build: F,
        plan: Plan,
        cancellation: Option<&CancellationToken>,
        await_completion: bool,
    ) -> Result<Option<Forwarded<S, V::Id>>>
    where
        F: FnOnce(&Snapshot<S, V>) -> Result<Snapshot<S, V>, SnapshotError>,
    {
        let span = info_span!(
            target: "diffable.apply",
            "diffable.apply",
            sequence,
            mode = field::Empty,
            changes = field::Empty,
        );
        let _guard = span.enter();

        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            debug!(target: "diffable.apply", sequence, "cancelled before diff");
            return Ok(None);
        }

        let previous = self.shared_snapshot();
        let candidate = build(&previous).map_err(|err| {
            warn!(target: "diffable.apply", sequence, error = %err, "candidate snapshot rejected");
            ApplyError::from(err)
        })?;

        let (mode, script) = match plan {
            Plan::FullReload => (RenderMode::FullReload, None),
            Plan::Diff { .. } if self.config.force_full_reload => (RenderMode::FullReload, None),
            Plan::Diff { animated } => {
                let script = diff(&previous, &candidate);
                let items = previous.number_of_items().max(candidate.number_of_items());
                let mode = if self.config.prefers_full_reload(script.change_count(), items) {
                    debug!(
                        target: "diffable.apply",
                        sequence,
                        changes = script.change_count(),
                        items,
                        "edit script over full-reload limit"
                    );
                    RenderMode::FullReload
                } else if animated {
                    RenderMode::Animated
                } else {
                    RenderMode::Immediate
                };
                (mode, Some(script))
            }
        };
        span.record("mode", mode.as_str());
        if let Some(script) = &script {
            span.record("changes", script.change_count());
        }

        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            debug!(target: "diffable.apply", sequence, "cancelled before forwarding; edit script discarded");
            return Ok(None);
        }

        let snapshot = Arc::new(candidate.settled());
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&snapshot);

        let (completion, settled) = if await_completion {
            let (completion, rx) = Completion::channel(sequence);
            (completion, Some(rx))
        } else {
            (Completion::detached(sequence), None)
        };
        match (&script, mode) {
            (Some(script), RenderMode::Animated | RenderMode::Immediate) => {
                self.renderer.render_edits(
                    RenderUpdate {
                        sequence,
                        script,
                        snapshot: &snapshot,
                        animated: mode == RenderMode::Animated,
                    },
                    completion,
                );
            }
            _ => self.renderer.render_full_reload(&snapshot, completion),
        }
        debug!(target: "diffable.apply", sequence, mode = mode.as_str(), "forwarded to renderer");

        Ok(Some(Forwarded {
            mode,
            script,
            settled,
        }))
    }

    fn finish(
        &self,
        sequence: u64,
        forwarded: Result<Option<Forwarded<S, V::Id>>>,
        started: Instant,
    ) -> Result<Outcome<S, V>> {
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        let (status, result) = match forwarded {
            Ok(Some(done)) => (
                NoticeStatus::Applied {
                    changes: done.script.as_ref().map(EditScript::change_count),
                    mode: done.mode,
                },
                Ok(ApplyOutcome::Applied(ApplyReport {
                    sequence,
                    mode: done.mode,
                    script: done.script,
                    elapsed_us,
                })),
            ),
            Ok(None) => (NoticeStatus::Cancelled, Ok(ApplyOutcome::Cancelled { sequence })),
            Err(err) => (NoticeStatus::Rejected, Err(err)),
        };
        // No subscribers is fine.
        let _ = self.notices.send(ApplyNotice { sequence, status });
        result
    }
}

fn edit_current<S, V, F>(
    change: F,
) -> impl FnOnce(&Snapshot<S, V>) -> Result<Snapshot<S, V>, SnapshotError>
where
    S: SectionKey,
    V: Identifiable + Clone,
    F: FnOnce(&mut Snapshot<S, V>) -> Result<(), SnapshotError>,
{
    move |current| {
        let mut next = current.clone();
        change(&mut next)?;
        Ok(next)
    }
}

fn replace_sections<S, V>(
    sections: Vec<(S, Vec<V>)>,
) -> impl FnOnce(&mut Snapshot<S, V>) -> Result<(), SnapshotError> + Send + 'static
where
    S: SectionKey + Send + 'static,
    V: Identifiable + Send + 'static,
{
    move |snapshot| {
        for (section, values) in sections {
            snapshot.set_items(values, &section)?;
        }
        Ok(())
    }
}
