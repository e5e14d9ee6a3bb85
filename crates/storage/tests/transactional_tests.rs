//! End-to-end behaviour of storage transactions under the retry engine.

mod common;

use common::{begin_tx, harness};
use depot_core::WritePolicy;
use depot_metadata::{DocumentFilter, DocumentSession, DocumentStore, FieldValue, MemoryDocumentStore};
use depot_storage::{StorageError, StorageEventKind, StorageTx};
use depot_transaction::{
    transactional, ErrorKind, TransactionalError, TransactionalPolicy, UnitOfWork,
};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Commit an out-of-band update to the named asset through a separate
/// session, bumping its version behind the transaction's back.
fn interfere(store: &MemoryDocumentStore, asset_name: &str) {
    let mut session = store.open_session();
    session.begin().unwrap();
    let document = session
        .find_first(
            "asset",
            &DocumentFilter::any().field("name", FieldValue::Text(asset_name.to_string())),
        )
        .unwrap()
        .expect("asset to interfere with");
    let mut fields = document.with_fields(|f| f.clone());
    fields.insert("interfered".to_string(), FieldValue::Bool(true));
    session.update(&document, fields).unwrap();
    session.commit().unwrap();
    session.close();
}

fn seed_asset(h: &common::Harness, name: &str) {
    let mut tx = begin_tx(h);
    let bucket = tx.bucket().unwrap().clone();
    let mut asset = tx.create_asset(&bucket, "raw").unwrap();
    asset.set_name(name);
    tx.save_asset(&mut asset).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();
}

#[test]
fn test_transactional_commit_makes_work_durable() {
    let h = harness(WritePolicy::Allow);
    UnitOfWork::begin(h.facet.tx_factory().unwrap()).unwrap();

    let result = transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |shared| {
        let mut tx = shared.borrow_mut();
        let bucket = tx.bucket()?.clone();
        let mut asset = tx.create_asset(&bucket, "raw")?;
        asset.set_name("durable.bin");
        tx.save_asset(&mut asset)?;
        Ok(())
    });
    UnitOfWork::end().unwrap();
    result.unwrap();

    assert_eq!(h.document_store.record_count("asset"), 1);
}

#[test]
fn test_conflicting_update_is_retried_to_success() {
    let h = harness(WritePolicy::Allow);
    seed_asset(&h, "contested.txt");

    UnitOfWork::begin(h.facet.tx_factory().unwrap()).unwrap();
    let attempts = Cell::new(0u32);
    let document_store = h.document_store.clone();

    let result = transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |shared| {
        attempts.set(attempts.get() + 1);
        let mut tx = shared.borrow_mut();
        let bucket = tx.bucket()?.clone();
        let mut stored = tx
            .find_asset_with_property(
                "name",
                FieldValue::Text("contested.txt".to_string()),
                &bucket,
            )?
            .expect("seeded asset");

        if attempts.get() == 1 {
            // Another writer commits between our read and our commit.
            interfere(&document_store, "contested.txt");
        }

        stored.attributes_mut().set("touched_by", "transactional body");
        tx.save_asset(&mut stored)?;
        Ok(())
    });
    UnitOfWork::end().unwrap();

    result.unwrap();
    // One conflicted attempt, one successful retry.
    assert_eq!(attempts.get(), 2);
}

#[test]
fn test_conflict_every_attempt_exhausts_the_budget() {
    let h = harness(WritePolicy::Allow);
    seed_asset(&h, "hopeless.txt");

    UnitOfWork::begin(h.facet.tx_factory().unwrap()).unwrap();
    let attempts = Cell::new(0u32);
    let document_store = h.document_store.clone();

    let result = transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |shared| {
        attempts.set(attempts.get() + 1);
        let mut tx = shared.borrow_mut();
        let bucket = tx.bucket()?.clone();
        let mut stored = tx
            .find_asset_with_property(
                "name",
                FieldValue::Text("hopeless.txt".to_string()),
                &bucket,
            )?
            .expect("seeded asset");

        interfere(&document_store, "hopeless.txt");

        stored.attributes_mut().set("attempt", attempts.get());
        tx.save_asset(&mut stored)?;
        Ok(())
    });
    UnitOfWork::end().unwrap();

    // Initial attempt plus the full retry budget of eight.
    assert_eq!(attempts.get(), 9);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn test_ignored_failure_still_commits() {
    let h = harness(WritePolicy::Allow);
    UnitOfWork::begin(h.facet.tx_factory().unwrap()).unwrap();

    let policy = TransactionalPolicy::new().ignore(ErrorKind::Io);
    let result = transactional::<StorageTx, _, _>(&policy, |shared| {
        let mut tx = shared.borrow_mut();
        let bucket = tx.bucket()?.clone();
        let mut asset = tx.create_asset(&bucket, "raw")?;
        asset.set_name("committed-despite-error.bin");
        tx.save_asset(&mut asset)?;
        Err::<(), _>(StorageError::Io(std::io::Error::other("late I/O failure")))
    });
    UnitOfWork::end().unwrap();

    // The failure is rethrown, but only after the commit succeeded.
    assert!(matches!(result, Err(StorageError::Io(_))));
    assert_eq!(h.document_store.record_count("asset"), 1);
}

#[test]
fn test_nested_transactional_calls_flatten() {
    let h = harness(WritePolicy::Allow);
    UnitOfWork::begin(h.facet.tx_factory().unwrap()).unwrap();

    let result = transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |_outer| {
        assert!(UnitOfWork::is_active());
        // Inner transactional call proceeds inside the outer transaction;
        // a second begin on the same transaction would fail.
        transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |inner| {
            let mut tx = inner.borrow_mut();
            let bucket = tx.bucket()?.clone();
            let mut asset = tx.create_asset(&bucket, "raw")?;
            asset.set_name("nested.bin");
            tx.save_asset(&mut asset)?;
            Ok(())
        })
    });
    UnitOfWork::end().unwrap();
    result.unwrap();

    assert_eq!(h.document_store.record_count("asset"), 1);
    // Exactly one commit published exactly one batch of events.
    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, StorageEventKind::AssetCreated);
}

#[test]
fn test_each_transactional_call_gets_a_fresh_transaction() {
    let h = harness(WritePolicy::Allow);
    let factory = h.facet.tx_factory().unwrap();
    let opened = Arc::new(AtomicUsize::new(0));
    let counted = {
        let opened = opened.clone();
        move || {
            opened.fetch_add(1, Ordering::SeqCst);
            factory()
        }
    };
    UnitOfWork::begin(counted).unwrap();

    for _ in 0..2 {
        transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |shared| {
            shared.borrow_mut().bucket().map(|_| ())
        })
        .unwrap();
    }
    UnitOfWork::end().unwrap();

    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_units_of_work_are_isolated() {
    let h = harness(WritePolicy::Allow);
    let factory = Arc::new(h.facet.tx_factory().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|index| {
            let factory = factory.clone();
            std::thread::spawn(move || {
                UnitOfWork::begin(move || (*factory)()).unwrap();
                let result =
                    transactional::<StorageTx, _, _>(&TransactionalPolicy::new(), |shared| {
                        let mut tx = shared.borrow_mut();
                        let bucket = tx.bucket()?.clone();
                        let mut asset = tx.create_asset(&bucket, "raw")?;
                        asset.set_name(format!("thread-{index}.bin"));
                        tx.save_asset(&mut asset)?;
                        Ok(())
                    });
                UnitOfWork::end().unwrap();
                result.unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Four independent transactions, four committed assets.
    assert_eq!(h.document_store.record_count("asset"), 4);
}
