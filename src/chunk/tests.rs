#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::chunk::lock::{ChunkLock, LockState};
    use crate::chunk::protocol::LockVote;
    use crate::hub::types::PeerId;
    use crate::table::types::{FieldValue, Id, TableKind};
    use crate::testing::*;

    // ============================================================
    // LOCK STATE MACHINE
    // ============================================================

    fn deadline() -> tokio::time::Instant {
        tokio::time::Instant::now() + std::time::Duration::from_secs(1)
    }

    #[tokio::test]
    async fn read_locks_stack() {
        let lock = ChunkLock::new();
        lock.read_lock(deadline()).await.unwrap();
        lock.read_lock(deadline()).await.unwrap();
        assert_eq!(lock.state().await, LockState::ReadLocked(2));
        lock.read_unlock().await;
        assert_eq!(lock.state().await, LockState::ReadLocked(1));
        lock.read_unlock().await;
        assert_eq!(lock.state().await, LockState::Unlocked);
    }

    #[tokio::test]
    async fn reader_defers_write_requests() {
        let lock = ChunkLock::new();
        let requester = PeerId::new("127.0.0.1:7001");
        lock.read_lock(deadline()).await.unwrap();
        assert_eq!(
            lock.vote(&requester, &Id::generate()).await,
            LockVote::AmReading
        );
        lock.read_unlock().await;
        assert_eq!(
            lock.vote(&requester, &Id::generate()).await,
            LockVote::Granted
        );
    }

    #[tokio::test]
    async fn rival_requests_conflict() {
        let lock = ChunkLock::new();
        let first = PeerId::new("127.0.0.1:7001");
        let second = PeerId::new("127.0.0.1:7002");

        assert_eq!(lock.vote(&first, &Id::generate()).await, LockVote::Granted);
        assert_eq!(
            lock.vote(&second, &Id::generate()).await,
            LockVote::Conflict {
                rival: first.clone(),
                held: false
            }
        );

        // The first requester's release clears the way.
        assert!(lock.remote_release(&first).await);
        assert_eq!(lock.vote(&second, &Id::generate()).await, LockVote::Granted);
    }

    #[tokio::test]
    async fn repeated_request_id_is_have_seen() {
        let lock = ChunkLock::new();
        let requester = PeerId::new("127.0.0.1:7001");
        let request_id = Id::generate();
        assert_eq!(lock.vote(&requester, &request_id).await, LockVote::Granted);
        assert_eq!(lock.vote(&requester, &request_id).await, LockVote::HaveSeen);
    }

    // ============================================================
    // SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn net_insert() {
        let cores = spawn_cluster(1).await;
        let table = add_test_table(&cores[0], TableKind::Cr);
        let chunk = table.new_chunk();

        let id = insert_value(&table, &chunk, 42).await;

        assert_eq!(table.count(cores[0].hub.sample()), 1);
        let found = table.get_by_id(&id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&found), 42);
        cores[0].shutdown().await;
    }

    #[tokio::test]
    async fn participation_request() {
        let cores = spawn_cluster(2).await;
        let root_table = add_test_table(&cores[0], TableKind::Cr);
        let peer_table = add_test_table(&cores[1], TableKind::Cr);
        let chunk = root_table.new_chunk();

        assert_eq!(cores[0].hub.peer_size(), 1);
        assert_eq!(chunk.peer_size(), 0);
        assert_eq!(chunk.request_participation().await, 1);
        assert_eq!(chunk.peer_size(), 1);

        let joined = peer_table.get_chunk_local(chunk.id()).unwrap();
        assert_eq!(joined.peer_size(), 1);
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test]
    async fn join_transfers_existing_state() {
        let cores = spawn_cluster(2).await;
        let root_table = add_test_table(&cores[0], TableKind::Cr);
        let peer_table = add_test_table(&cores[1], TableKind::Cr);
        let chunk = root_table.new_chunk();
        let id = insert_value(&root_table, &chunk, 42).await;

        chunk.request_participation().await;

        let found = peer_table.get_by_id(&id, cores[1].hub.sample()).unwrap();
        assert_eq!(int_of(&found), 42);
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test]
    async fn remote_update_propagates_back() {
        let cores = spawn_cluster(2).await;
        let root_table = add_test_table(&cores[0], TableKind::Cru);
        let peer_table = add_test_table(&cores[1], TableKind::Cru);
        let chunk = root_table.new_chunk();
        let id = insert_value(&root_table, &chunk, 42).await;
        assert_eq!(chunk.request_participation().await, 1);

        // The new holder updates the item.
        let mut revision = peer_table.get_by_id(&id, cores[1].hub.sample()).unwrap();
        revision.set(FIELD_NAME, FieldValue::Int(21)).unwrap();
        peer_table.update(&mut revision).await.unwrap();

        // The original holder observed the write before the lock release.
        let found = root_table.get_by_id(&id, cores[0].hub.sample()).unwrap();
        assert_eq!(int_of(&found), 21);
        assert_eq!(root_table.count(cores[0].hub.sample()), 1);
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_lock_is_mutually_exclusive() {
        let cores = spawn_cluster(3).await;
        let tables: Vec<_> = cores
            .iter()
            .map(|core| add_test_table(core, TableKind::Cr))
            .collect();
        let chunk = tables[0].new_chunk();
        assert_eq!(chunk.request_participation().await, 2);

        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();
        for (i, table) in tables.iter().enumerate() {
            let chunk = if i == 0 {
                chunk.clone()
            } else {
                table.get_chunk_local(chunk.id()).unwrap()
            };
            let active = active.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..3 {
                    chunk.write_lock().await.unwrap();
                    let concurrent = active.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(concurrent, 0, "two write locks held at once");
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    chunk.unlock().await;
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn grind_insert_update_cycles() {
        const CYCLES: usize = 5;
        let cores = spawn_cluster(3).await;
        let tables: Vec<_> = cores
            .iter()
            .map(|core| add_test_table(core, TableKind::Cru))
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
                for _ in 0..CYCLES {
                    let id = insert_value(&table, &chunk, 42).await;
                    let mut revision =
                        table.get_by_id(&id, chunk.hub().sample()).unwrap();
                    revision.set(FIELD_NAME, FieldValue::Int(21)).unwrap();
                    table.update(&mut revision).await.unwrap();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        // Every holder converged on the same final state.
        for (core, table) in cores.iter().zip(&tables) {
            let now = core.hub.sample();
            assert_eq!(table.count(now), 3 * CYCLES);
            for revision in table.dump(now).values() {
                assert_eq!(int_of(revision), 21);
            }
        }
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test]
    async fn leave_shrinks_the_holder_set() {
        let cores = spawn_cluster(2).await;
        let root_table = add_test_table(&cores[0], TableKind::Cr);
        let peer_table = add_test_table(&cores[1], TableKind::Cr);
        let chunk = root_table.new_chunk();
        insert_value(&root_table, &chunk, 42).await;
        chunk.request_participation().await;

        peer_table.leave_all_chunks().await;

        assert_eq!(chunk.peer_size(), 0);
        // The remaining holder can still write.
        insert_value(&root_table, &chunk, 7).await;
        assert_eq!(root_table.count(cores[0].hub.sample()), 2);
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test]
    async fn request_to_unknown_chunk_is_declined() {
        let cores = spawn_cluster(2).await;
        let _root_table = add_test_table(&cores[0], TableKind::Cr);
        add_test_table(&cores[1], TableKind::Cr);

        let request = crate::chunk::protocol::ConnectRequest {
            table: TEST_TABLE.to_string(),
            chunk_id: Id::generate(),
        };
        let reply = cores[0]
            .hub
            .request(
                cores[1].own_id(),
                crate::chunk::protocol::MSG_CONNECT,
                &request,
            )
            .await
            .unwrap();
        assert!(reply.is_decline());
        for core in cores {
            core.shutdown().await;
        }
    }
}
