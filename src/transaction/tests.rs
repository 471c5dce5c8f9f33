#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::chunk::chunk::Chunk;
    use crate::table::net_table::NetTable;
    use crate::table::types::{FieldValue, TableKind};
    use crate::testing::*;
    use crate::transaction::{ChunkTransaction, Transaction};

    fn staged_insert(table: &Arc<NetTable>, value: i64) -> crate::table::types::Revision {
        let mut revision = table.new_revision();
        revision.set(FIELD_NAME, FieldValue::Int(value)).unwrap();
        revision
    }

    // ============================================================
    // CHUNK TRANSACTIONS
    // ============================================================

    #[tokio::test]
    async fn chunk_transaction_commits_once() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cru);
        let chunk = table.new_chunk();

        let mut transaction = ChunkTransaction::new(chunk.clone());
        let revision = staged_insert(&table, 42);
        let id = revision.id.clone();
        transaction.insert(revision).unwrap();

        // Staged values are visible to the transaction before commit.
        let staged = transaction.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(int_of(&staged), 42);
        assert!(table.get_by_id(&id, cores[0].hub.sample()).is_none());

        assert!(transaction.commit().await.unwrap());
        let found = table.get_by_id(&id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&found), 42);
        cores[0].shutdown().await;
    }

    #[tokio::test]
    async fn stale_update_is_a_clean_conflict() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cru);
        let chunk = table.new_chunk();
        let id = insert_value(&table, &chunk, 42).await;

        // Begin, then lose a race against a direct update.
        let mut transaction = ChunkTransaction::new(chunk.clone());
        let mut racing = table.get_by_id(&id, cores[0].hub.sample()).unwrap();
        racing.set(FIELD_NAME, FieldValue::Int(43)).unwrap();
        table.update(&mut racing).await.unwrap();

        let mut stale = table.get_by_id(&id, transaction.begin_time()).unwrap();
        stale.set(FIELD_NAME, FieldValue::Int(21)).unwrap();
        transaction.update(stale).unwrap();

        assert!(!transaction.commit().await.unwrap());
        // State unchanged by the failed commit.
        let found = table.get_by_id(&id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&found), 43);
        cores[0].shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_conditions_keep_values_unique() {
        const UNIQUE_ITEMS: i64 = 10;
        let cores = spawn_cluster(3).await;
        let tables: Vec<_> = cores
            .iter()
            .map(|core| add_test_table(core, TableKind::Cr))
            .collect();
        let root_chunk = tables[0].new_chunk();
        assert_eq!(root_chunk.request_participation().await, 2);

        let mut workers = Vec::new();
        for (i, table) in tables.iter().enumerate() {
            let chunk = if i == 0 {
                root_chunk.clone()
            } else {
                table.get_chunk_local(root_chunk.id()).unwrap()
            };
            let table = table.clone();
            workers.push(tokio::spawn(async move {
                for value in 0..UNIQUE_ITEMS {
                    let mut transaction = ChunkTransaction::new(chunk.clone());
                    let mut revision = table.new_revision();
                    revision.set(FIELD_NAME, FieldValue::Int(value)).unwrap();
                    transaction.insert(revision).unwrap();
                    transaction.add_conflict_condition(FIELD_NAME, FieldValue::Int(value));
                    // Either this peer inserted the value or someone else
                    // already had.
                    transaction.commit().await.unwrap();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        for (core, table) in cores.iter().zip(&tables) {
            let dump = table.dump(core.hub.sample());
            assert_eq!(dump.len(), UNIQUE_ITEMS as usize);
            let mut values: Vec<i64> = dump.values().map(int_of).collect();
            values.sort_unstable();
            assert_eq!(values, (0..UNIQUE_ITEMS).collect::<Vec<_>>());
        }
        for core in cores {
            core.shutdown().await;
        }
    }

    // ============================================================
    // MULTI-CHUNK TRANSACTIONS
    // ============================================================

    #[tokio::test]
    async fn multi_commit_reuses_the_transaction() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cru);
        let chunk = table.new_chunk();

        let mut transaction = Transaction::begin(cores[0].hub.clone());
        let first = staged_insert(&table, 1);
        let first_id = first.id.clone();
        transaction.insert(&table, &chunk, first).unwrap();
        assert!(transaction.commit().await.unwrap());
        assert_eq!(table.count(cores[0].hub.sample()), 1);

        let second = staged_insert(&table, 2);
        let second_id = second.id.clone();
        transaction.insert(&table, &chunk, second).unwrap();
        let mut update_first = table.get_by_id(&first_id, cores[0].hub.sample()).unwrap();
        update_first.set(FIELD_NAME, FieldValue::Int(3)).unwrap();
        transaction.update(&table, update_first).await.unwrap();
        assert!(transaction.commit().await.unwrap());
        assert_eq!(table.count(cores[0].hub.sample()), 2);

        // A perturber slips in an update; the reused transaction now
        // carries a stale view of that item.
        let mut perturber = Transaction::begin(cores[0].hub.clone());
        let mut racing = table.get_by_id(&second_id, cores[0].hub.sample()).unwrap();
        racing.set(FIELD_NAME, FieldValue::Int(4)).unwrap();
        perturber.update(&table, racing).await.unwrap();
        assert!(perturber.commit().await.unwrap());

        let mut stale = table.get_by_id(&second_id, transaction.begin_time()).unwrap();
        stale.set(FIELD_NAME, FieldValue::Int(5)).unwrap();
        transaction.update(&table, stale).await.unwrap();
        assert!(!transaction.commit().await.unwrap());
        cores[0].shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cross_chunk_commit_is_atomic_and_deadlock_free() {
        const ROUNDS: usize = 5;
        let cores = spawn_cluster(2).await;
        let tables: Vec<_> = cores
            .iter()
            .map(|core| add_test_table(core, TableKind::Cr))
            .collect();
        let chunk_x = tables[0].new_chunk();
        let chunk_y = tables[0].new_chunk();
        chunk_x.request_participation().await;
        chunk_y.request_participation().await;

        let mut workers = Vec::new();
        for (i, core) in cores.iter().enumerate() {
            let table = tables[i].clone();
            let x = table.get_chunk_local(chunk_x.id()).unwrap();
            let y = table.get_chunk_local(chunk_y.id()).unwrap();
            let hub = core.hub.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let mut transaction = Transaction::begin(hub.clone());
                    transaction
                        .insert(&table, &x, staged_insert(&table, 1))
                        .unwrap();
                    transaction
                        .insert(&table, &y, staged_insert(&table, 2))
                        .unwrap();
                    assert!(transaction.commit().await.unwrap());
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        for (core, table) in cores.iter().zip(&tables) {
            assert_eq!(table.count(core.hub.sample()), 2 * 2 * ROUNDS);
        }
        for core in cores {
            core.shutdown().await;
        }
    }

    // ============================================================
    // MERGE
    // ============================================================

    async fn increment(
        table: &Arc<NetTable>,
        id: &crate::table::types::Id,
        chunk: &Arc<Chunk>,
        transaction: &mut Transaction,
    ) {
        let revision = transaction
            .get_by_id(id, table, chunk)
            .await
            .unwrap()
            .expect("item to increment");
        let mut updated = revision.clone();
        updated
            .set(FIELD_NAME, FieldValue::Int(int_of(&revision) + 1))
            .unwrap();
        transaction.update(table, updated).await.unwrap();
    }

    #[tokio::test]
    async fn transaction_merge_splits_conflicts() {
        let cores = spawn_cluster(2).await;
        let root_table = add_test_table(&cores[0], TableKind::Cru);
        let peer_table = add_test_table(&cores[1], TableKind::Cru);
        let chunk = root_table.new_chunk();
        let a_id = insert_value(&root_table, &chunk, 42).await;
        let b_id = insert_value(&root_table, &chunk, 21).await;
        chunk.request_participation().await;

        // ROOT's transaction checks out before A commits.
        let mut transaction = Transaction::begin(cores[0].hub.clone());
        increment(&root_table, &a_id, &chunk, &mut transaction).await;
        increment(&root_table, &b_id, &chunk, &mut transaction).await;

        // A increments item a and commits first.
        let peer_chunk = peer_table.get_chunk_local(chunk.id()).unwrap();
        let mut peer_transaction = Transaction::begin(cores[1].hub.clone());
        increment(&peer_table, &a_id, &peer_chunk, &mut peer_transaction).await;
        assert!(peer_transaction.commit().await.unwrap());

        assert!(!transaction.commit().await.unwrap());

        let (mut merged, conflicts) = transaction.merge().await.unwrap();
        assert_eq!(merged.num_changed_items(), 1);
        assert_eq!(conflicts.len(), 1);
        let table_conflicts = &conflicts[&root_table.name()];
        assert_eq!(table_conflicts.len(), 1);
        assert_eq!(int_of(table_conflicts[0].ours.as_ref().unwrap()), 43);
        assert_eq!(int_of(&table_conflicts[0].theirs), 43);

        // The rebased transaction commits against the post-state.
        assert!(merged.commit().await.unwrap());
        let b_now = root_table.get_by_id(&b_id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&b_now), 22);
        let a_now = root_table.get_by_id(&a_id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&a_now), 43);
        for core in cores {
            core.shutdown().await;
        }
    }

    // ============================================================
    // PARALLEL COMMIT
    // ============================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn tandem_commit_reads_through_futures() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cru);
        let chunk = table.new_chunk();

        for _ in 0..20 {
            let mut dependee = Transaction::begin(cores[0].hub.clone());
            let first = staged_insert(&table, 1);
            let first_id = first.id.clone();
            dependee.insert(&table, &chunk, first).unwrap();
            let futures = dependee.commit_in_parallel();

            let mut depender = Transaction::begin_with_futures(cores[0].hub.clone(), futures);
            let speculative = depender
                .get_by_id(&first_id, &table, &chunk)
                .await
                .unwrap();
            assert!(speculative.is_some());
            depender
                .insert(&table, &chunk, staged_insert(&table, 2))
                .unwrap();

            assert!(dependee.join_parallel_commit().await.unwrap());
            depender.detach_futures();
            assert!(depender.commit().await.unwrap());
        }
        assert_eq!(table.count(cores[0].hub.sample()), 40);
        cores[0].shutdown().await;
    }

    #[tokio::test]
    #[should_panic(expected = "finalized")]
    async fn modifying_a_finalized_transaction_panics() {
        let core = spawn_core().await;
        let table = add_test_table(&core, TableKind::Cru);
        let chunk = table.new_chunk();

        let mut dependee = Transaction::begin(core.hub.clone());
        dependee
            .insert(&table, &chunk, staged_insert(&table, 1))
            .unwrap();
        let _futures = dependee.commit_in_parallel();
        // Finalization: no further staging.
        dependee
            .insert(&table, &chunk, staged_insert(&table, 2))
            .unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "attached parallel futures")]
    async fn committing_with_attached_futures_panics() {
        let core = spawn_core().await;
        let table = add_test_table(&core, TableKind::Cru);
        let chunk = table.new_chunk();

        let mut dependee = Transaction::begin(core.hub.clone());
        dependee
            .insert(&table, &chunk, staged_insert(&table, 1))
            .unwrap();
        let futures = dependee.commit_in_parallel();

        let mut depender = Transaction::begin_with_futures(core.hub.clone(), futures);
        depender
            .insert(&table, &chunk, staged_insert(&table, 2))
            .unwrap();
        // Committing before join + detach is a programming error.
        let _ = depender.commit().await;
    }

    // ============================================================
    // MERGE SOUNDNESS
    // ============================================================

    #[tokio::test]
    async fn merge_partitions_every_staged_change() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cru);
        let chunk = table.new_chunk();
        let touched = insert_value(&table, &chunk, 1).await;
        let untouched = insert_value(&table, &chunk, 2).await;

        let mut transaction = Transaction::begin(cores[0].hub.clone());
        increment(&table, &touched, &chunk, &mut transaction).await;
        increment(&table, &untouched, &chunk, &mut transaction).await;
        let fresh = staged_insert(&table, 9);
        transaction.insert(&table, &chunk, fresh).unwrap();
        let staged_total = transaction.num_changed_items();

        // Race: someone updates `touched`.
        let mut racing = table.get_by_id(&touched, cores[0].hub.sample()).unwrap();
        racing.set(FIELD_NAME, FieldValue::Int(100)).unwrap();
        table.update(&mut racing).await.unwrap();

        assert!(!transaction.commit().await.unwrap());
        let (merged, conflicts) = transaction.merge().await.unwrap();
        let conflict_total: usize = conflicts.values().map(|list| list.len()).sum();
        assert_eq!(merged.num_changed_items() + conflict_total, staged_total);
        cores[0].shutdown().await;
    }
}
