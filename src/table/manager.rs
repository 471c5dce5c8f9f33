use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;

use crate::chord::index::ChordIndex;
use crate::chunk::chunk::Chunk;
use crate::config::Config;
use crate::hub::service::Hub;

use super::net_table::NetTable;
use super::types::{Id, TableDescriptor, TableKind};

/// The `name -> table` map of a peer. Tables are added at construction and
/// never removed while serving; inbound chunk and index messages are routed
/// through here.
pub struct TableManager {
    hub: Arc<Hub>,
    tables: RwLock<HashMap<String, Arc<NetTable>>>,
    cru_linked: bool,
    lock_timeout: Duration,
    finger_count: usize,
}

impl TableManager {
    pub fn new(hub: Arc<Hub>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            hub,
            tables: RwLock::new(HashMap::new()),
            cru_linked: config.cru_linked,
            lock_timeout: config.lock_timeout,
            finger_count: config.chord_fingers,
        })
    }

    pub fn add_table(&self, kind: TableKind, descriptor: TableDescriptor) -> Result<Arc<NetTable>> {
        let table = NetTable::new(
            kind,
            descriptor,
            self.hub.clone(),
            self.cru_linked,
            self.lock_timeout,
            self.finger_count,
        );
        let name = table.name();
        let mut tables = self.tables.write().unwrap();
        anyhow::ensure!(
            !tables.contains_key(&name),
            "table {} registered twice",
            name
        );
        tables.insert(name, table.clone());
        Ok(table)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<NetTable>> {
        self.tables.read().unwrap().get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().unwrap().keys().cloned().collect()
    }

    /// Routing for index messages: the addressed table's ring state, if
    /// this peer participates.
    pub fn index_of(&self, table: &str) -> Option<Arc<ChordIndex>> {
        self.get_table(table)?.index_handle()
    }

    /// Routing for chunk messages: the addressed chunk, if held here.
    pub fn chunk_of(&self, table: &str, chunk_id: &Id) -> Option<Arc<Chunk>> {
        self.get_table(table)?.get_chunk_local(chunk_id)
    }

    pub async fn kill_all(&self) {
        let tables: Vec<Arc<NetTable>> =
            self.tables.read().unwrap().values().cloned().collect();
        for table in tables {
            table.kill().await;
        }
    }
}
