#![forbid(unsafe_code)]

//! Tracing output of the apply controller.
//!
//! Every request runs inside a `diffable.apply` span carrying its sequence,
//! render mode and change count; the diff engine's `diffable.diff` span nests
//! inside it. Cancellation, rejection and dropped completions are logged
//! under the `diffable.apply` target.
//!
//! Run:
//!   cargo test -p diffable-runtime --test tracing_apply_spans

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use diffable_core::{Record, Snapshot};
use diffable_runtime::{
    ApplyController, ApplyOptions, CancellationSource, Completion, ControllerConfig, RenderUpdate,
    Renderer,
};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record as SpanValues};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone)]
struct SeenSpan {
    name: &'static str,
    target: &'static str,
    level: Level,
    fields: HashMap<String, String>,
    parent: Option<&'static str>,
}

#[derive(Debug, Clone)]
struct SeenEvent {
    level: Level,
    target: &'static str,
    message: String,
    fields: HashMap<String, String>,
    parent: Option<&'static str>,
}

#[derive(Default)]
struct Seen {
    spans: Vec<SeenSpan>,
    events: Vec<SeenEvent>,
}

/// Position of a span in `Seen::spans`, kept in the span's extensions.
struct Slot(usize);

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Seen>>);

impl Capture {
    fn spans(&self) -> Vec<SeenSpan> {
        self.0.lock().unwrap().spans.clone()
    }

    fn events(&self) -> Vec<SeenEvent> {
        self.0.lock().unwrap().events.clone()
    }
}

struct Fields<'a>(&'a mut HashMap<String, String>);

impl Visit for Fields<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S> Layer<S> for Capture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let meta = attrs.metadata();
        // Declared-but-empty fields show up as "".
        let mut fields: HashMap<String, String> =
            meta.fields().iter().map(|f| (f.name().to_string(), String::new())).collect();
        attrs.record(&mut Fields(&mut fields));

        let Some(span) = ctx.span(id) else { return };
        let parent = span.parent().map(|p| p.name());
        let mut seen = self.0.lock().unwrap();
        span.extensions_mut().insert(Slot(seen.spans.len()));
        seen.spans.push(SeenSpan {
            name: meta.name(),
            target: meta.target(),
            level: *meta.level(),
            fields,
            parent,
        });
    }

    fn on_record(&self, id: &Id, values: &SpanValues<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let extensions = span.extensions();
        let Some(Slot(slot)) = extensions.get::<Slot>() else { return };
        let mut seen = self.0.lock().unwrap();
        values.record(&mut Fields(&mut seen.spans[*slot].fields));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut Fields(&mut fields));
        let message = fields.get("message").cloned().unwrap_or_default();
        self.0.lock().unwrap().events.push(SeenEvent {
            level: *event.metadata().level(),
            target: event.metadata().target(),
            message,
            fields,
            parent: ctx.event_span(event).map(|s| s.name()),
        });
    }
}

/// Run `f` under a subscriber that records every span and event.
fn capture<F: FnOnce()>(f: F) -> Capture {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::TRACE)
        .with(capture.clone());
    tracing::subscriber::with_default(subscriber, f);
    capture
}

// ============================================================================
// Fixtures
// ============================================================================

type Row = Record<u32, i32>;
type Snap = Snapshot<&'static str, Row>;

/// Completes immediately, or drops the completion when `drop_completion`.
struct TestRenderer {
    drop_completion: bool,
}

impl Renderer<&'static str, Row> for TestRenderer {
    fn render_edits(&self, _update: RenderUpdate<'_, &'static str, Row>, completion: Completion) {
        if !self.drop_completion {
            completion.complete();
        }
    }

    fn render_full_reload(&self, _snapshot: &Snap, completion: Completion) {
        if !self.drop_completion {
            completion.complete();
        }
    }
}

fn controller(config: ControllerConfig, drop_completion: bool) -> ApplyController<&'static str, Row> {
    let renderer: Arc<dyn Renderer<&'static str, Row>> = Arc::new(TestRenderer { drop_completion });
    ApplyController::with_config(renderer, config)
}

fn rows(ids: &[u32]) -> Snap {
    let mut snap = Snap::new();
    snap.append_sections(["feed"]).unwrap();
    snap.append_items(ids.iter().map(|id| Record::new(*id, 0)), None)
        .unwrap();
    snap
}

fn spans_named(handle: &Capture, name: &str) -> Vec<SeenSpan> {
    handle
        .spans()
        .into_iter()
        .filter(|s| s.name == name)
        .collect()
}

// ============================================================================
// Span Tests
// ============================================================================

#[test]
fn apply_span_records_sequence_mode_and_changes() {
    let handle = capture(|| {
        let controller = controller(ControllerConfig::default(), false);
        controller.apply(rows(&[1, 2]), true).unwrap();
        controller.apply(rows(&[2, 1]), false).unwrap();
    });

    let applies = spans_named(&handle, "diffable.apply");
    assert_eq!(applies.len(), 2, "one span per request");
    assert_eq!(applies[0].target, "diffable.apply");
    assert_eq!(applies[0].level, Level::INFO);
    assert_eq!(applies[0].fields["sequence"], "0");
    assert_eq!(applies[0].fields["mode"], "animated");
    // Section insert plus two item inserts.
    assert_eq!(applies[0].fields["changes"], "3");
    assert_eq!(applies[1].fields["sequence"], "1");
    assert_eq!(applies[1].fields["mode"], "immediate");
    assert_eq!(applies[1].fields["changes"], "1");
}

#[test]
fn diff_span_nests_inside_apply_span() {
    let handle = capture(|| {
        let controller = controller(ControllerConfig::default(), false);
        controller.apply(rows(&[1, 2, 3]), true).unwrap();
    });

    let diffs = spans_named(&handle, "diffable.diff");
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].parent, Some("diffable.apply"));
    assert_eq!(diffs[0].fields["new_items"], "3");
}

#[test]
fn forced_full_reload_skips_diff_span() {
    let handle = capture(|| {
        let config = ControllerConfig {
            force_full_reload: true,
            ..Default::default()
        };
        controller(config, false).apply(rows(&[1]), true).unwrap();
    });

    assert!(spans_named(&handle, "diffable.diff").is_empty());
    let applies = spans_named(&handle, "diffable.apply");
    assert_eq!(applies[0].fields["mode"], "full_reload");
    assert_eq!(applies[0].fields["changes"], "", "no diff, no change count");
}

// ============================================================================
// Event Tests
// ============================================================================

#[test]
fn forwarding_is_logged_inside_apply_span() {
    let handle = capture(|| {
        controller(ControllerConfig::default(), false)
            .apply(rows(&[1]), true)
            .unwrap();
    });

    let forwarded: Vec<_> = handle
        .events()
        .into_iter()
        .filter(|e| e.message == "forwarded to renderer")
        .collect();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].target, "diffable.apply");
    assert_eq!(forwarded[0].parent, Some("diffable.apply"));
}

#[test]
fn cancellation_is_logged_at_debug() {
    let handle = capture(|| {
        let controller = controller(ControllerConfig::default(), false);
        let source = CancellationSource::new();
        source.cancel();
        controller
            .apply_with(rows(&[1]), ApplyOptions::new(true).with_cancellation(source.token()))
            .unwrap();
    });

    let events = handle.events();
    let cancelled = events
        .iter()
        .find(|e| e.message.starts_with("cancelled before diff"))
        .expect("cancellation event");
    assert_eq!(cancelled.level, Level::DEBUG);
    assert_eq!(cancelled.target, "diffable.apply");
    assert!(!events.iter().any(|e| e.message == "forwarded to renderer"));
}

#[test]
fn late_cancellation_logs_discarded_script() {
    let handle = capture(|| {
        let controller = controller(ControllerConfig::default(), false);
        controller.apply(rows(&[1]), true).unwrap();
        let source = CancellationSource::new();
        let options = ApplyOptions::new(true).with_cancellation(source.token());
        let outcome = controller
            .apply_changes(options, move |s| {
                source.cancel();
                s.append_items([Record::new(2, 0)], None)
            })
            .unwrap();
        assert!(!outcome.is_applied());
    });

    let events = handle.events();
    let discarded = events
        .iter()
        .find(|e| e.message == "cancelled before forwarding; edit script discarded")
        .expect("discard event");
    assert_eq!(discarded.level, Level::DEBUG);
    assert_eq!(discarded.fields["sequence"], "1");
    assert_eq!(discarded.parent, Some("diffable.apply"));
    assert!(!events.iter().any(|e| e.message.starts_with("cancelled before diff")));

    // The diff ran, so the span still reports what would have been sent.
    let applies = spans_named(&handle, "diffable.apply");
    assert_eq!(applies[1].fields["changes"], "1");
    assert_eq!(spans_named(&handle, "diffable.diff").len(), 2);
}

#[test]
fn rejected_candidate_is_logged_at_warn() {
    let handle = capture(|| {
        let controller = controller(ControllerConfig::default(), false);
        controller.apply(rows(&[1]), true).unwrap();
        let result = controller.apply_changes(ApplyOptions::default(), |s| {
            s.move_item_before(&1, &42)
        });
        assert!(result.is_err());
    });

    let warned: Vec<_> = handle
        .events()
        .into_iter()
        .filter(|e| e.level == Level::WARN && e.target == "diffable.apply")
        .collect();
    assert_eq!(warned.len(), 1);
    assert_eq!(warned[0].message, "candidate snapshot rejected");
    assert!(warned[0].fields["error"].contains("42"));
}

#[test]
fn dropped_completion_is_logged_and_releases_apply() {
    let handle = capture(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let controller = controller(ControllerConfig::default(), true);
            let outcome = controller.apply_async(rows(&[1]), true).await.unwrap();
            assert!(outcome.is_applied());
            assert_eq!(controller.pending_requests(), 0);
        });
    });

    let warned: Vec<_> = handle
        .events()
        .into_iter()
        .filter(|e| e.level == Level::WARN)
        .collect();
    assert_eq!(warned.len(), 1);
    assert!(warned[0].message.starts_with("completion dropped"));
    assert_eq!(warned[0].fields["sequence"], "0");
}
