//! Backfill of conversation records written before the participant-key schema.
//!
//! A record is migrated once it has `participants`, `participant_key` and
//! `last_message_time`. Anything else gets a [`BackfillPatch`] derived from
//! what the record already carries. Patches only fill columns that are still
//! absent, so the runner is safe alongside live traffic and a second run is a
//! no-op.

use crate::error::{ConversationResult, MigrationRecordError};
use crate::metrics::MIGRATION_RECORDS;
use crate::models::{BackfillPatch, ConversationRecord};
use crate::repository::{BackfillOutcome, ConversationRepository};
use crate::services::participant_key::canonicalize;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub fn is_migrated(record: &ConversationRecord) -> bool {
    record.participants.is_some()
        && record.participant_key.is_some()
        && record.last_message_time.is_some()
}

/// Derive the patch that brings `record` to the current schema.
///
/// Participants come from the current column, else the legacy column, else
/// the members of an existing key. An already migrated record yields an
/// empty patch.
pub fn plan_backfill(record: &ConversationRecord) -> Result<BackfillPatch, MigrationRecordError> {
    let mut patch = BackfillPatch::default();

    let participants = match (&record.participants, &record.participant_ids, &record.participant_key)
    {
        (Some(current), _, _) => current.clone(),
        (None, Some(legacy), _) => {
            patch.participants = Some(legacy.clone());
            legacy.clone()
        }
        (None, None, Some(key)) => {
            let members = key.members();
            patch.participants = Some(members.clone());
            members
        }
        (None, None, None) => return Err(MigrationRecordError::MissingParticipants),
    };

    if record.participant_key.is_none() {
        let key =
            canonicalize(&participants).map_err(|_| MigrationRecordError::TooFewParticipants)?;
        patch.participant_key = Some(key);
    }

    if record.last_message_time.is_none() {
        patch.last_message_time = Some(0);
    }

    Ok(patch)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub conversation_id: Uuid,
    pub reason: String,
    #[serde(skip)]
    pub error: MigrationRecordError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    /// Records patched by this run (or that would be, in dry-run mode)
    pub migrated: usize,
    /// Records already on the current schema
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<MigrationFailure>,
}

impl MigrationReport {
    fn record_failure(&mut self, conversation_id: Uuid, error: MigrationRecordError) {
        MIGRATION_RECORDS.with_label_values(&["failed"]).inc();
        warn!(conversation_id = %conversation_id, error = %error, "conversation not migrated");
        self.failed += 1;
        self.failures.push(MigrationFailure {
            conversation_id,
            reason: error.to_string(),
            error,
        });
    }

    fn record_skip(&mut self) {
        MIGRATION_RECORDS.with_label_values(&["skipped"]).inc();
        self.skipped += 1;
    }

    fn record_migrated(&mut self) {
        MIGRATION_RECORDS.with_label_values(&["migrated"]).inc();
        self.migrated += 1;
    }
}

pub struct MigrationRunner {
    repo: Arc<dyn ConversationRepository>,
    batch_size: usize,
    dry_run: bool,
    start_after: Option<Uuid>,
}

impl MigrationRunner {
    pub fn new(repo: Arc<dyn ConversationRepository>, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
            dry_run: false,
            start_after: None,
        }
    }

    /// Resume a scan after the given record id
    pub fn start_after(mut self, id: Option<Uuid>) -> Self {
        self.start_after = id;
        self
    }

    /// Compute the report without writing anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Visit every record in id order and backfill the ones that need it.
    ///
    /// Only a failing scan aborts the run. Per-record problems, including a
    /// failed write, land in the report.
    pub async fn run(&self) -> ConversationResult<MigrationReport> {
        let mut report = MigrationReport::default();
        let mut after = self.start_after;

        info!(
            batch_size = self.batch_size,
            dry_run = self.dry_run,
            start_after = ?self.start_after,
            "conversation migration started"
        );

        loop {
            let batch = self.repo.scan(after, self.batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            let batch_len = batch.len();

            for record in batch {
                report.scanned += 1;
                self.migrate_record(&record, &mut report).await;
            }

            info!(
                scanned = report.scanned,
                migrated = report.migrated,
                failed = report.failed,
                "migration batch complete"
            );

            if batch_len < self.batch_size {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed,
            dry_run = self.dry_run,
            "conversation migration finished"
        );
        Ok(report)
    }

    async fn migrate_record(&self, record: &ConversationRecord, report: &mut MigrationReport) {
        if is_migrated(record) {
            report.record_skip();
            return;
        }

        let patch = match plan_backfill(record) {
            Ok(patch) => patch,
            Err(e) => {
                report.record_failure(record.id, e);
                return;
            }
        };

        if self.dry_run {
            match self.key_owner(&patch, record.id).await {
                Ok(Some(owner)) => report.record_failure(record.id, duplicate(&patch, owner)),
                Ok(None) => report.record_migrated(),
                Err(e) => report.record_failure(record.id, MigrationRecordError::Store(e.to_string())),
            }
            return;
        }

        match self.repo.apply_backfill(record.id, &patch).await {
            Ok(BackfillOutcome::Applied) => report.record_migrated(),
            // Live traffic filled the gaps between scan and write
            Ok(BackfillOutcome::Unchanged) => report.record_skip(),
            Ok(BackfillOutcome::KeyTaken { owner }) => {
                report.record_failure(record.id, duplicate(&patch, owner))
            }
            Err(e) => report.record_failure(record.id, MigrationRecordError::Store(e.to_string())),
        }
    }

    /// Another conversation already holding the patch's key, if any
    async fn key_owner(&self, patch: &BackfillPatch, id: Uuid) -> ConversationResult<Option<Uuid>> {
        let Some(key) = &patch.participant_key else {
            return Ok(None);
        };
        Ok(self
            .repo
            .find_by_key(key)
            .await?
            .map(|owner| owner.id)
            .filter(|owner| *owner != id))
    }
}

fn duplicate(patch: &BackfillPatch, owner: Uuid) -> MigrationRecordError {
    MigrationRecordError::DuplicateKey {
        key: patch
            .participant_key
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_default(),
        owner,
    }
}
