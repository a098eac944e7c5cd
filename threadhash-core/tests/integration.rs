use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;
use threadhash_core::{
    compute_reference, content_id, Chatlog, ChatlogConfig, ContentStore, DirectoryEntry, Error,
    FileCache, LegacyCache, MemoryContentStore, MemoryDirectory, MemoryMessageStore,
    MemoryStatusStore, MessageStore, MigrationConfig, Payload, RunOutcome,
};

type MemoryChatlog = Chatlog<MemoryMessageStore, MemoryContentStore, FileCache>;

fn chatlog(dir: &TempDir, max_page_limit: usize) -> MemoryChatlog {
    Chatlog::new(
        MemoryMessageStore::new(),
        MemoryContentStore::new(),
        FileCache::new(dir.path()),
        ChatlogConfig {
            max_page_limit,
            ..ChatlogConfig::default()
        },
    )
}

fn text(from: &str, content: &str, timestamp: Option<i64>) -> Payload {
    Payload {
        from_did: from.to_string(),
        to_did: "eip155:0xpeer".to_string(),
        message_content: content.to_string(),
        message_type: "Text".to_string(),
        sig_type: "pgp".to_string(),
        enc_type: "PlainText".to_string(),
        timestamp,
        ..Payload::default()
    }
}

#[tokio::test]
async fn chained_pages_cover_history_exactly_once() {
    let dir = TempDir::new().unwrap();
    let log = chatlog(&dir, 4);
    let mut appended = Vec::new();
    for i in 0..11 {
        // Pairs of equal timestamps exercise the sequence tie-break.
        let message = log.append("c1", text("alice", &format!("m{i}"), Some(i / 2))).await.unwrap();
        appended.push(message.reference);
    }

    let mut seen = Vec::new();
    let mut cursor = appended.last().unwrap().to_string();
    loop {
        let page = log.page(&cursor, 4).await.unwrap();
        assert!(page.len() <= 4);
        let last = page.last().unwrap();
        seen.extend(page.iter().map(|m| m.reference.clone()));
        match &last.payload.link {
            Some(link) => cursor = link.clone(),
            None => break,
        }
    }

    let expected: Vec<_> = appended.into_iter().rev().collect();
    assert_eq!(seen, expected);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
}

#[tokio::test]
async fn concurrent_appends_get_distinct_sequences() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(chatlog(&dir, 30));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..20 {
        let log = Arc::clone(&log);
        tasks.spawn(async move { log.append("c1", text("bob", &format!("m{i}"), Some(100))).await });
    }
    let mut sequences = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        let message = result.unwrap().unwrap();
        assert!(sequences.insert(message.sequence));
    }

    let head = log.head("c1").await.unwrap().unwrap().head_reference.unwrap();
    let history = log.history(&head.to_string()).await.unwrap();
    assert_eq!(history.len(), 20);
    assert!(history.windows(2).all(|w| w[0].sequence > w[1].sequence));
    assert_eq!(history.iter().filter(|m| m.payload.link.is_none()).count(), 1);
}

#[tokio::test]
async fn archived_message_resolves_by_content_id() {
    let dir = TempDir::new().unwrap();
    let log = chatlog(&dir, 30);
    log.append("c1", text("alice", "first", Some(1))).await.unwrap();
    let second = log.append("c1", text("alice", "second", Some(2))).await.unwrap();

    let report = log.archive_pending(None).await.unwrap();
    assert_eq!(report.uploaded, 2);

    let cid = content_id(&second.payload).unwrap();
    let blob = log.legacy().content().get(&cid).await.unwrap().unwrap();
    assert_eq!(Payload::from_cbor(&blob).unwrap(), second.payload);

    // A content id is a valid legacy handle and maps back to the same message.
    let message = log.materialize(&cid.to_string()).await.unwrap();
    assert_eq!(message.reference, second.reference);
    assert!(message.archived);
}

#[tokio::test]
async fn archived_copy_of_backfilled_node_resolves_to_its_row() {
    let dir = TempDir::new().unwrap();
    let log = chatlog(&dir, 30);
    let directory = MemoryDirectory::new();
    let status = MemoryStatusStore::new();
    let legacy = text("alice", "untimestamped", None);
    log.legacy().cache().write("oldid", &legacy.to_json().unwrap()).await.unwrap();
    directory
        .insert(DirectoryEntry {
            conversation_id: "c1".to_string(),
            threadhash: Some("oldid".to_string()),
            epoch_ms: 4_000,
        })
        .await;
    log.migrator(&directory, &status).run().await.unwrap();

    let stored = log.materialize("oldid").await.unwrap();
    assert_eq!(stored.timestamp, 4_000);
    assert_eq!(log.archive_pending(None).await.unwrap().uploaded, 1);

    // The archived payload carries the backfilled timestamp, so its hash no
    // longer matches the stored reference.
    let cid = content_id(&stored.payload).unwrap().to_string();
    assert_ne!(compute_reference(&stored.payload).unwrap(), stored.reference);
    let message = log.materialize(&cid).await.unwrap();
    assert_eq!(message.reference, stored.reference);
    assert_eq!(message.content_id.as_deref(), Some(cid.as_str()));
}

#[tokio::test]
async fn migrated_history_is_readable_through_every_handle_shape() {
    let dir = TempDir::new().unwrap();
    let log = chatlog(&dir, 30);
    let directory = MemoryDirectory::new();
    let status = MemoryStatusStore::new();

    // Root lives in the content store under its CID, the rest in the cache.
    let root = text("alice", "root", Some(1_000));
    let root_id = log.legacy().content().put(&root.to_cbor().unwrap()).await.unwrap().to_string();
    let mid = Payload {
        link: Some(root_id.clone()),
        ..text("bob", "mid", None)
    };
    log.legacy().cache().write("midid", &mid.to_json().unwrap()).await.unwrap();
    let head = Payload {
        link: Some("midid".to_string()),
        ..text("alice", "head", None)
    };
    log.legacy().cache().write("headid", &head.to_json().unwrap()).await.unwrap();
    directory
        .insert(DirectoryEntry {
            conversation_id: "c1".to_string(),
            threadhash: Some("headid".to_string()),
            epoch_ms: 9_000,
        })
        .await;

    let report = match log.migrator(&directory, &status).run().await.unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("migration did not complete: {other:?}"),
    };
    assert_eq!(report.migrated, 3);

    // Legacy and direct handles agree.
    let head_ref = compute_reference(&head).unwrap();
    assert_eq!(log.resolve("headid").await.unwrap(), head_ref);
    assert_eq!(log.resolve(&root_id).await.unwrap(), compute_reference(&root).unwrap());

    let page = log.page("headid", 10).await.unwrap();
    let contents: Vec<_> = page.iter().map(|m| m.payload.message_content.as_str()).collect();
    assert_eq!(contents, ["head", "mid", "root"]);
    assert_eq!(page[0].timestamp, 9_000);
    assert_eq!(page[1].timestamp, 8_000);

    let stored_head = directory.get("c1").await.unwrap().threadhash.unwrap();
    assert_eq!(stored_head, head_ref.to_string());
    assert_eq!(log.head("c1").await.unwrap().unwrap().head_reference, Some(head_ref.clone()));

    // New messages continue the migrated chain.
    let next = log.append("c1", text("bob", "after", Some(10_000))).await.unwrap();
    let link = next.payload.link.unwrap();
    assert_eq!(log.resolve(&link).await.unwrap(), head_ref);

    let again = log.migrator(&directory, &status).run().await.unwrap();
    assert_eq!(again, RunOutcome::AlreadyCompleted);
}

#[tokio::test]
async fn migration_reports_unreachable_nodes_as_gaps() {
    let dir = TempDir::new().unwrap();
    let log = Chatlog::new(
        MemoryMessageStore::new(),
        MemoryContentStore::new(),
        FileCache::new(dir.path()),
        ChatlogConfig {
            migration: MigrationConfig {
                page_size: 1,
                ..MigrationConfig::default()
            },
            ..ChatlogConfig::default()
        },
    );
    let directory = MemoryDirectory::new();
    let status = MemoryStatusStore::new();
    let head = Payload {
        link: Some("vanished".to_string()),
        ..text("alice", "orphan", Some(5))
    };
    log.legacy().cache().write("orphanhead", &head.to_json().unwrap()).await.unwrap();
    for (conversation, threadhash) in [("c1", "orphanhead"), ("c2", "missinghead")] {
        directory
            .insert(DirectoryEntry {
                conversation_id: conversation.to_string(),
                threadhash: Some(threadhash.to_string()),
                epoch_ms: 0,
            })
            .await;
    }

    let RunOutcome::Completed(report) = log.migrator(&directory, &status).run().await.unwrap() else {
        panic!("migration did not complete");
    };

    assert_eq!(report.migrated, 1);
    let gaps: Vec<_> = report.gaps.iter().map(|g| (g.conversation_id.as_str(), g.identifier.as_str())).collect();
    assert_eq!(gaps, [("c1", "vanished"), ("c2", "missinghead")]);
    assert_eq!(report.rewritten_heads, 1);
    assert_eq!(report.skipped_heads, 1);
    assert_eq!(directory.get("c2").await.unwrap().threadhash.as_deref(), Some("missinghead"));

    let stored = log.store().get_by_reference(&compute_reference(&head).unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.payload.link, Some(format!("previous:{}", stored.reference)));
    let err = log.resolve(stored.payload.link.as_deref().unwrap()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidHandle(_)));
}
