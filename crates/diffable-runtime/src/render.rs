#![forbid(unsafe_code)]

//! Boundary to the rendering collaborator.
//!
//! The controller never draws anything. After each diff it hands a
//! [`RenderUpdate`] to a [`Renderer`] together with a [`Completion`]; the
//! renderer owns every visual effect and calls [`Completion::complete`] once
//! the transition is on screen. Async applies resume at that point.

use diffable_core::{EditScript, Identifiable, ItemId, Snapshot};
use tokio::sync::oneshot;
use tracing::warn;

/// One batched edit forwarded to the renderer.
#[derive(Debug)]
pub struct RenderUpdate<'a, S, V: Identifiable> {
    /// Queue sequence of the request that produced this update.
    pub sequence: u64,
    /// Changes from the previously rendered snapshot.
    pub script: &'a EditScript<S, ItemId<V>>,
    /// The snapshot the renderer should end up showing.
    pub snapshot: &'a Snapshot<S, V>,
    /// Whether the renderer should animate the transition.
    pub animated: bool,
}

/// Receives edit scripts and full reloads from an apply controller.
///
/// Calls arrive one at a time, in request order, while the controller's queue
/// turn is held. Implementations may finish the transition later (after an
/// animation, on another thread) and signal through the [`Completion`].
pub trait Renderer<S, V: Identifiable>: Send + Sync {
    /// Apply a batched edit script.
    fn render_edits(&self, update: RenderUpdate<'_, S, V>, completion: Completion);

    /// Discard everything and rebuild from `snapshot`.
    fn render_full_reload(&self, snapshot: &Snapshot<S, V>, completion: Completion);
}

/// One-shot signal that a forwarded transition has been applied.
///
/// Dropping a completion without calling [`complete`](Self::complete) also
/// releases the waiting apply, with a warning.
#[derive(Debug)]
pub struct Completion {
    sequence: u64,
    tx: Option<oneshot::Sender<()>>,
}

impl Completion {
    pub(crate) fn channel(sequence: u64) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sequence,
                tx: Some(tx),
            },
            rx,
        )
    }

    /// A completion nobody waits on (blocking applies).
    pub(crate) fn detached(sequence: u64) -> Self {
        Self { sequence, tx: None }
    }

    /// Sequence of the apply this completion belongs to.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Signal that the transition is done.
    pub fn complete(mut self) {
        if let Some(tx) = self.tx.take() {
            // The waiting apply may have been dropped; nothing to resume then.
            let _ = tx.send(());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                target: "diffable.apply",
                sequence = self.sequence,
                "completion dropped without complete(); treating transition as settled"
            );
        }
    }
}
