#![forbid(unsafe_code)]

//! Presentation host: one apply controller plus a data source.
//!
//! A [`CollectionHost`] is the thin adapter a screen holds. It asks its
//! [`DataSource`] for the section order and the records, builds the initial
//! snapshot, and applies it through the shared [`ApplyController`]. Hosts
//! differ only in their data source and its lifecycle hook.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use diffable_core::{Identifiable, SectionKey, Snapshot, SnapshotError};
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::controller::{ApplyController, ApplyOptions, ApplyOutcome};
use crate::error::Result;

/// Supplies the records a host displays.
#[async_trait]
pub trait DataSource<S, V>: Send + Sync
where
    S: Send + 'static,
    V: Send + 'static,
{
    /// Every section the host can show, in display order.
    fn all_sections(&self) -> Vec<S>;

    /// Records per section. Sections the host should show must be present,
    /// with an empty list if they have no items; missing sections are left
    /// out of the snapshot.
    async fn retrieve_records(&self) -> HashMap<S, Vec<V>>;

    /// Called once a load has been applied, unless it was cancelled.
    fn data_was_loaded(&self) {}
}

/// How a [`CollectionHost::load_data`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome<S, I> {
    /// The token was cancelled before records were requested.
    CancelledBeforeRetrieval,
    /// Records arrived after the token was cancelled; nothing was applied.
    CancelledAfterRetrieval,
    /// The load reached the controller.
    Finished(ApplyOutcome<S, I>),
}

/// Owns a data source and shares an apply controller.
pub struct CollectionHost<S, V: Identifiable, D> {
    controller: Arc<ApplyController<S, V>>,
    source: D,
}

impl<S, V, D> CollectionHost<S, V, D>
where
    S: SectionKey + Send + Sync + 'static,
    V: Identifiable + PartialEq + Clone + Send + Sync + 'static,
    V::Id: Send + Sync,
    D: DataSource<S, V>,
{
    pub fn new(controller: Arc<ApplyController<S, V>>, source: D) -> Self {
        Self { controller, source }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<ApplyController<S, V>> {
        &self.controller
    }

    #[must_use]
    pub fn source(&self) -> &D {
        &self.source
    }

    /// Build a fresh snapshot from retrieved records.
    ///
    /// Sections follow [`DataSource::all_sections`] order. A section is
    /// included only if `records` has an entry for it.
    pub fn initial_snapshot(
        &self,
        mut records: HashMap<S, Vec<V>>,
    ) -> Result<Snapshot<S, V>, SnapshotError> {
        let mut snapshot = Snapshot::new();
        for section in self.source.all_sections() {
            let Some(values) = records.remove(&section) else {
                continue;
            };
            snapshot.append_sections([section.clone()])?;
            snapshot.append_items(values, Some(&section))?;
        }
        if !records.is_empty() {
            let unknown: Vec<&S> = records.keys().collect();
            warn!(
                target: "diffable.host",
                ?unknown,
                "records for sections outside all_sections() were ignored"
            );
        }
        Ok(snapshot)
    }

    /// Retrieve records and apply them as the new snapshot.
    ///
    /// `token` is checked before retrieval, after retrieval, and by the
    /// controller before forwarding.
    pub async fn load_data(
        &self,
        token: &CancellationToken,
    ) -> Result<LoadOutcome<S, V::Id>> {
        if token.is_cancelled() {
            debug!(target: "diffable.host", "load cancelled before retrieval");
            return Ok(LoadOutcome::CancelledBeforeRetrieval);
        }

        let records = self.source.retrieve_records().await;
        if token.is_cancelled() {
            debug!(target: "diffable.host", "load cancelled after retrieval");
            return Ok(LoadOutcome::CancelledAfterRetrieval);
        }

        let snapshot = self.initial_snapshot(records)?;
        let items = snapshot.number_of_items();
        let outcome = self
            .controller
            .apply_async_with(snapshot, ApplyOptions::default().with_cancellation(token.clone()))
            .await?;

        if outcome.is_applied() && !token.is_cancelled() {
            debug!(target: "diffable.host", sequence = outcome.sequence(), items, "data loaded");
            self.source.data_was_loaded();
        }
        Ok(LoadOutcome::Finished(outcome))
    }
}
