//! Multi-peer test fixtures: several real peers, each with its own RPC
//! listener on an ephemeral port, inside one test process.

use std::sync::Arc;

use crate::chunk::chunk::Chunk;
use crate::config::Config;
use crate::core::MapCore;
use crate::hub::types::PeerId;
use crate::table::net_table::NetTable;
use crate::table::types::{FieldType, FieldValue, Id, TableDescriptor, TableKind};

pub(crate) const TEST_TABLE: &str = "chunk_test_table";
pub(crate) const FIELD_NAME: &str = "value";

pub(crate) async fn spawn_core() -> Arc<MapCore> {
    spawn_core_with(test_config()).await
}

pub(crate) async fn spawn_core_with(config: Config) -> Arc<MapCore> {
    MapCore::init(config).await.expect("failed to init core")
}

pub(crate) fn test_config() -> Config {
    let mut config = Config::for_bind("127.0.0.1:0".parse().unwrap());
    config.lock_timeout = std::time::Duration::from_secs(20);
    config
}

/// N fully meshed peers: each newcomer announces to all earlier ones.
pub(crate) async fn spawn_cluster(n: usize) -> Vec<Arc<MapCore>> {
    let mut cores: Vec<Arc<MapCore>> = Vec::with_capacity(n);
    for _ in 0..n {
        let core = spawn_core().await;
        let seeds: Vec<PeerId> = cores.iter().map(|c| c.own_id().clone()).collect();
        core.hub.join_network(&seeds).await.unwrap();
        cores.push(core);
    }
    cores
}

pub(crate) fn test_descriptor() -> TableDescriptor {
    TableDescriptor::new(TEST_TABLE).add_field(FIELD_NAME, FieldType::Int)
}

pub(crate) fn add_test_table(core: &Arc<MapCore>, kind: TableKind) -> Arc<NetTable> {
    core.tables.add_table(kind, test_descriptor()).unwrap()
}

/// Inserts `n` into the chunk and returns the new item's id.
pub(crate) async fn insert_value(table: &Arc<NetTable>, chunk: &Arc<Chunk>, n: i64) -> Id {
    let mut revision = table.new_revision();
    revision.set(FIELD_NAME, FieldValue::Int(n)).unwrap();
    let id = revision.id.clone();
    let time = chunk.hub().sample();
    table.insert(time, chunk, &mut revision).await.unwrap();
    id
}

pub(crate) fn int_of(revision: &crate::table::types::Revision) -> i64 {
    match revision.get(FIELD_NAME) {
        Some(FieldValue::Int(n)) => *n,
        other => panic!("field {:?} is not an int: {:?}", FIELD_NAME, other),
    }
}

/// Lets spawned announcements and triggers drain.
pub(crate) async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}
