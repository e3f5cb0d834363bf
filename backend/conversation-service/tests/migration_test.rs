//! Legacy backfill through MigrationRunner and the service entry point.

use conversation_service::repository::ConversationRepository;
use conversation_service::services::{canonicalize, is_migrated};
use conversation_service::{
    Config, ConversationRecord, ConversationService, ManualClock, MemoryRepository, MessageFormat,
    MigrationRecordError, MigrationRunner, StaticIdentityResolver,
};
use std::sync::Arc;
use uuid::Uuid;

fn legacy(participant_ids: Option<Vec<Uuid>>) -> ConversationRecord {
    ConversationRecord {
        id: Uuid::new_v4(),
        participant_ids,
        participants: None,
        participant_key: None,
        last_message_id: None,
        last_message_time: None,
    }
}

fn service(repo: Arc<MemoryRepository>) -> ConversationService {
    ConversationService::new(
        repo,
        Arc::new(StaticIdentityResolver::new()),
        Arc::new(ManualClock::new(1_000)),
        Config::default(),
    )
}

#[tokio::test]
async fn test_legacy_record_gets_key_and_zero_time() {
    let repo = Arc::new(MemoryRepository::new());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut record = legacy(None);
    record.participants = Some(vec![a, b]);
    let id = record.id;
    repo.seed_record(record).await.unwrap();

    let report = service(repo.clone()).run_conversation_migration().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 0);

    let stored = repo.get(id).await.unwrap().unwrap();
    assert!(is_migrated(&stored));
    assert_eq!(stored.participant_key, Some(canonicalize(&[a, b]).unwrap()));
    assert_eq!(stored.last_message_time, Some(0));
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let repo = Arc::new(MemoryRepository::new());
    for _ in 0..3 {
        repo.seed_record(legacy(Some(vec![Uuid::new_v4(), Uuid::new_v4()])))
            .await
            .unwrap();
    }
    let service = service(repo.clone());

    let first = service.run_conversation_migration().await.unwrap();
    assert_eq!(first.migrated, 3);
    let snapshot = repo.scan(None, 100).await.unwrap();

    let second = service.run_conversation_migration().await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.migrated, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(repo.scan(None, 100).await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_bad_records_are_reported_and_skipped() {
    let repo = Arc::new(MemoryRepository::new());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let good = legacy(Some(vec![a, b]));
    let empty = legacy(None);
    let lonely = legacy(Some(vec![a, a]));
    let (good_id, empty_id, lonely_id) = (good.id, empty.id, lonely.id);
    for record in [good, empty, lonely] {
        repo.seed_record(record).await.unwrap();
    }

    // Batch size 1 exercises the keyset scan across batches
    let report = MigrationRunner::new(repo.clone(), 1).run().await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 2);

    let reason = |id: Uuid| {
        report
            .failures
            .iter()
            .find(|f| f.conversation_id == id)
            .map(|f| f.error.clone())
    };
    assert_eq!(reason(empty_id), Some(MigrationRecordError::MissingParticipants));
    assert_eq!(reason(lonely_id), Some(MigrationRecordError::TooFewParticipants));
    assert_eq!(reason(good_id), None);
    assert!(is_migrated(&repo.get(good_id).await.unwrap().unwrap()));
}

#[tokio::test]
async fn test_resolve_claims_unmigrated_legacy_conversation() {
    let repo = Arc::new(MemoryRepository::new());
    let service = service(repo.clone());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let record = legacy(Some(vec![a, b]));
    let legacy_id = record.id;
    repo.seed_record(record).await.unwrap();

    assert_eq!(service.resolve_conversation(&[b, a]).await.unwrap(), legacy_id);
    assert_eq!(repo.conversation_count().await, 1);

    // Already keyed by the resolve, so the runner has nothing left to do
    for _ in 0..2 {
        let report = service.run_conversation_migration().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.migrated, 0);
    }
    assert_eq!(service.resolve_conversation(&[a, b]).await.unwrap(), legacy_id);
}

#[tokio::test]
async fn test_two_legacy_rows_for_one_pair() {
    let repo = Arc::new(MemoryRepository::new());
    let service = service(repo.clone());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let first = legacy(Some(vec![a, b]));
    let second = legacy(Some(vec![b, a]));
    // The scan walks ids in ascending order
    let (owner_id, duplicate_id) = if first.id < second.id {
        (first.id, second.id)
    } else {
        (second.id, first.id)
    };
    repo.seed_record(first).await.unwrap();
    repo.seed_record(second).await.unwrap();

    let report = service.run_conversation_migration().await.unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].conversation_id, duplicate_id);
    assert!(matches!(
        &report.failures[0].error,
        MigrationRecordError::DuplicateKey { owner, .. } if *owner == owner_id
    ));

    assert_eq!(service.resolve_conversation(&[a, b]).await.unwrap(), owner_id);
    assert_eq!(repo.get(duplicate_id).await.unwrap().unwrap().participant_key, None);
    assert_eq!(repo.conversation_count().await, 2);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let repo = Arc::new(MemoryRepository::new());
    let record = legacy(Some(vec![Uuid::new_v4(), Uuid::new_v4()]));
    let id = record.id;
    repo.seed_record(record.clone()).await.unwrap();

    let report = MigrationRunner::new(repo.clone(), 10)
        .dry_run(true)
        .run()
        .await
        .unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(repo.get(id).await.unwrap().unwrap(), record);
}

#[tokio::test]
async fn test_migration_preserves_live_pointer() {
    let repo = Arc::new(MemoryRepository::new());
    let service = service(repo.clone());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    // Legacy row that already carries a message pointer but no key
    let mut record = legacy(Some(vec![a, b]));
    record.last_message_time = Some(900);
    let id = record.id;
    repo.seed_record(record).await.unwrap();

    // Appending works on the in-memory view before migration
    let message_id = service
        .send_message(id, a, "before migration", MessageFormat::Text)
        .await
        .unwrap();

    service.run_conversation_migration().await.unwrap();

    let stored = repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.last_message_id, Some(message_id));
    assert_eq!(stored.last_message_time, Some(1_000));
    assert_eq!(stored.participants, Some(vec![a, b]));
    assert!(stored.participant_key.is_some());

    // The migrated legacy row is now what get-or-create finds
    assert_eq!(service.resolve_conversation(&[b, a]).await.unwrap(), id);
}

#[tokio::test]
async fn test_resume_after_id() {
    let repo = Arc::new(MemoryRepository::new());
    for _ in 0..4 {
        repo.seed_record(legacy(Some(vec![Uuid::new_v4(), Uuid::new_v4()])))
            .await
            .unwrap();
    }
    let ids: Vec<Uuid> = repo
        .scan(None, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    let report = MigrationRunner::new(repo.clone(), 2)
        .start_after(Some(ids[1]))
        .run()
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert!(!is_migrated(&repo.get(ids[0]).await.unwrap().unwrap()));
    assert!(is_migrated(&repo.get(ids[3]).await.unwrap().unwrap()));
}
