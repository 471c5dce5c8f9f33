//! Core Lifecycle Module
//!
//! One [`MapCore`] per peer process: it binds the RPC listener, wires every
//! subsystem's handlers into the hub (explicitly, at startup), runs the
//! discovery bootstrap and owns the server task. There are no implicit
//! statics; tests construct and destroy a core per fixture.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::Extension;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sysinfo::System;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::hub::handlers::handle_rpc;
use crate::hub::service::Hub;
use crate::hub::types::{PeerId, ENDPOINT_RPC};
use crate::raft::RaftCluster;
use crate::table::manager::TableManager;

pub struct MapCore {
    pub config: Config,
    pub hub: Arc<Hub>,
    pub tables: Arc<TableManager>,
    pub raft: Option<Arc<RaftCluster>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl MapCore {
    /// Brings a peer up: bind, register handlers, serve, announce.
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let listener = tokio::net::TcpListener::bind(config.bind).await?;
        let bound = listener.local_addr()?;
        let mut config = config;
        config.bind = bound;

        let hub = Hub::new(PeerId::new(bound.to_string()), &config);
        crate::hub::handlers::register_handlers(&hub);

        let tables = TableManager::new(hub.clone(), &config);
        crate::chord::handlers::register_handlers(&hub, &tables);
        crate::chunk::handlers::register_handlers(&hub, &tables);
        crate::spatial::register_handlers(&hub, &tables);

        let raft = if config.enable_raft {
            let raft = RaftCluster::new(hub.clone(), &config);
            raft.clone().register_handlers();
            Some(raft)
        } else {
            None
        };

        let app = Router::new()
            .route(ENDPOINT_RPC, post(handle_rpc))
            .route("/health/routes", get(handle_routes))
            .route("/health/stats", get(handle_stats))
            .layer(Extension(hub.clone()))
            .layer(Extension(tables.clone()));

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("RPC server terminated: {}", e);
            }
        });
        tracing::info!("Peer {} listening", bound);

        hub.join_network(&config.seeds).await?;

        Ok(Arc::new(Self {
            config,
            hub,
            tables,
            raft,
            server: Mutex::new(Some(server)),
        }))
    }

    pub fn own_id(&self) -> &PeerId {
        self.hub.own_id()
    }

    /// Leaves every chunk and ring, deregisters from discovery and stops
    /// serving.
    pub async fn shutdown(&self) {
        self.tables.kill_all().await;
        if let Some(raft) = &self.raft {
            raft.stop();
        }
        self.hub.shutdown().await;
        if let Some(server) = self.server.lock().unwrap().take() {
            server.abort();
        }
    }
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<&'static str>,
    message_types: Vec<String>,
}

#[derive(Serialize)]
struct NodeStatsResponse {
    node_id: String,
    peer_size: usize,
    tables: Vec<TableStats>,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

#[derive(Serialize)]
struct TableStats {
    name: String,
    active_chunks: usize,
    items: usize,
}

async fn handle_routes(Extension(hub): Extension<Arc<Hub>>) -> Json<RoutesResponse> {
    let mut message_types = hub.registry().list_types();
    message_types.sort();
    Json(RoutesResponse {
        routes: vec![ENDPOINT_RPC, "/health/routes", "/health/stats"],
        message_types,
    })
}

async fn handle_stats(
    Extension(hub): Extension<Arc<Hub>>,
    Extension(tables): Extension<Arc<TableManager>>,
) -> Json<NodeStatsResponse> {
    let now = hub.clock().current();
    let table_stats = tables
        .table_names()
        .into_iter()
        .filter_map(|name| tables.get_table(&name))
        .map(|table| TableStats {
            name: table.name(),
            active_chunks: table.active_chunk_count(),
            items: table.count(now),
        })
        .collect();

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(NodeStatsResponse {
        node_id: hub.own_id().to_string(),
        peer_size: hub.peer_size(),
        tables: table_stats,
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
