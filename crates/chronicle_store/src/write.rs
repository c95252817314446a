//! Versioned write engine.
//!
//! Each write reads the current slot, skips values equal to what is stored, and hands the
//! rest to the layout router, whose compare-and-swap turns a concurrent writer into
//! `OptimisticLock`. The surrounding transaction is retried on conflict. Events and
//! retention run only after commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction};

use crate::config::StoreSettings;
use crate::index::writer::index_aspect;
use crate::layout::{LayoutRouter, LayoutWrite};
use crate::retention;
use crate::retry::{run_in_transaction, TransactionBody};
use chronicle_core::{
    AppliedVersion, AspectValue, AuditStamp, ChangeEvent, ChangeEventProducer, ChronicleError,
    ChronicleResult, EqualityTester, Registry, StoredPayload, StructuralEquality, Urn,
};

pub(crate) const WRITE_CONFLICT_FAILPOINT: &str = "write.conflict";

/// A validated write: `value` is `None` for a delete.
#[derive(Clone, Debug)]
pub(crate) struct PreparedWrite {
    pub urn: Urn,
    pub aspect_type: String,
    pub value: Option<AspectValue>,
    pub payload: StoredPayload,
    pub audit: AuditStamp,
}

#[derive(Clone, Debug)]
struct WriteOutcome {
    previous: Option<AspectValue>,
    applied: AppliedVersion,
}

pub(crate) struct WriteEngine<'a> {
    pub conn: &'a DatabaseConnection,
    pub registry: &'a Registry,
    pub router: &'a LayoutRouter,
    pub settings: &'a StoreSettings,
    pub failpoints: &'a HashSet<String>,
    pub equality: &'a HashMap<String, Arc<dyn EqualityTester>>,
    pub events: &'a dyn ChangeEventProducer,
}

impl WriteEngine<'_> {
    /// Checks the write against the registry and size limit before any I/O.
    pub fn prepare(
        &self,
        urn: &Urn,
        aspect_type: &str,
        value: Option<AspectValue>,
        audit: AuditStamp,
    ) -> ChronicleResult<PreparedWrite> {
        self.registry.check_aspect_for(urn, aspect_type)?;
        let payload = match &value {
            Some(value) => {
                if value.aspect_type != aspect_type {
                    return Err(ChronicleError::invalid(format!(
                        "value of type '{}' written as '{aspect_type}'",
                        value.aspect_type
                    )));
                }
                let raw = value.to_json_string()?;
                if raw.len() > self.settings.max_payload_bytes {
                    return Err(ChronicleError::invalid(format!(
                        "{aspect_type} payload of {} bytes exceeds limit {}",
                        raw.len(),
                        self.settings.max_payload_bytes
                    )));
                }
                StoredPayload::Value(raw)
            }
            None => StoredPayload::Tombstone,
        };
        Ok(PreparedWrite {
            urn: urn.clone(),
            aspect_type: aspect_type.to_string(),
            value,
            payload,
            audit,
        })
    }

    pub async fn write(&self, write: &PreparedWrite) -> ChronicleResult<AppliedVersion> {
        let body = SingleWrite {
            engine: self,
            write,
        };
        let outcome =
            run_in_transaction(self.conn, self.settings.max_transaction_retries, "add", &body)
                .await?;
        self.after_commit(write, &outcome).await;
        Ok(outcome.applied)
    }

    /// Applies `writes` in order. With `atomic_multiple_update` every write shares one
    /// transaction; otherwise each commits on its own and a failure stops the batch.
    pub async fn write_many(&self, writes: &[PreparedWrite]) -> ChronicleResult<Vec<AppliedVersion>> {
        if !self.settings.atomic_multiple_update {
            let mut applied = Vec::with_capacity(writes.len());
            for write in writes {
                applied.push(self.write(write).await?);
            }
            return Ok(applied);
        }
        let body = AtomicWrites {
            engine: self,
            writes,
        };
        let outcomes = run_in_transaction(
            self.conn,
            self.settings.max_transaction_retries,
            "add_many",
            &body,
        )
        .await?;
        let mut applied = Vec::with_capacity(outcomes.len());
        for (write, outcome) in writes.iter().zip(&outcomes) {
            self.after_commit(write, outcome).await;
            applied.push(outcome.applied);
        }
        Ok(applied)
    }

    async fn apply_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        write: &PreparedWrite,
    ) -> ChronicleResult<WriteOutcome> {
        let slot = self
            .router
            .read_latest(conn, &write.urn, &write.aspect_type)
            .await?;
        let previous = match &slot {
            Some(slot) => slot.value()?,
            None => None,
        };
        let unchanged = match (&previous, &write.value) {
            (None, None) => true,
            (Some(current), Some(candidate)) => {
                self.tester(&write.aspect_type).equals(current, candidate)
            }
            _ => false,
        };
        if unchanged {
            return Ok(WriteOutcome {
                previous,
                applied: AppliedVersion::Unchanged,
            });
        }
        if self.failpoints.contains(WRITE_CONFLICT_FAILPOINT) {
            return Err(ChronicleError::optimistic_lock(format!(
                "failpoint {WRITE_CONFLICT_FAILPOINT}"
            )));
        }
        let layout_write = LayoutWrite {
            urn: &write.urn,
            aspect_type: &write.aspect_type,
            payload: &write.payload,
            audit: &write.audit,
        };
        let applied = self.router.apply(conn, &layout_write, slot.as_ref()).await?;
        if self.settings.index_enabled && self.router.mode().uses_history() {
            index_aspect(
                conn,
                self.registry,
                &write.urn,
                &write.aspect_type,
                &write.payload,
            )
            .await?;
        }
        Ok(WriteOutcome { previous, applied })
    }

    fn tester(&self, aspect_type: &str) -> &dyn EqualityTester {
        match self.equality.get(aspect_type) {
            Some(tester) => tester.as_ref(),
            None => &StructuralEquality,
        }
    }

    async fn after_commit(&self, write: &PreparedWrite, outcome: &WriteOutcome) {
        if !outcome.applied.is_applied() {
            return;
        }
        self.events.produce(ChangeEvent {
            urn: write.urn.clone(),
            aspect_type: write.aspect_type.clone(),
            previous: outcome.previous.clone(),
            current: write.value.clone(),
            audit: write.audit.clone(),
        });
        let AppliedVersion::Replaced { displaced_to } = outcome.applied else {
            return;
        };
        if displaced_to < 1 || !self.router.mode().uses_history() {
            return;
        }
        let policy = self.settings.retention.policy_for(&write.aspect_type);
        if let Err(err) =
            retention::enforce(self.conn, &policy, &write.urn, &write.aspect_type, displaced_to)
                .await
        {
            log::warn!(
                "retention for {} {} failed: {err}",
                write.urn,
                write.aspect_type
            );
        }
    }
}

struct SingleWrite<'a> {
    engine: &'a WriteEngine<'a>,
    write: &'a PreparedWrite,
}

impl TransactionBody for SingleWrite<'_> {
    type Output = WriteOutcome;

    async fn run(&self, tx: &DatabaseTransaction) -> ChronicleResult<WriteOutcome> {
        self.engine.apply_in(tx, self.write).await
    }
}

struct AtomicWrites<'a> {
    engine: &'a WriteEngine<'a>,
    writes: &'a [PreparedWrite],
}

impl TransactionBody for AtomicWrites<'_> {
    type Output = Vec<WriteOutcome>;

    async fn run(&self, tx: &DatabaseTransaction) -> ChronicleResult<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(self.writes.len());
        for write in self.writes {
            outcomes.push(self.engine.apply_in(tx, write).await?);
        }
        Ok(outcomes)
    }
}
