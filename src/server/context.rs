// src/server/context.rs

//! Shared state threaded through every HTTP handler and background task.

use crate::config::Config;
use crate::core::adaptor::Adaptor;
use crate::core::async_sender::AsyncDocIdSender;
use crate::core::docid::DocIdCodec;
use crate::core::feed::GsaVersion;
use crate::core::feed::docid_sender::DocIdSender;
use crate::core::journal::Journal;
use crate::core::saml::service_provider::SamlServiceProvider;
use crate::core::session::SessionManager;
use crate::core::shutdown::ShutdownWaiter;
use crate::core::time::TimeSource;
use crate::core::transform::TransformPipeline;
use crate::core::watchdog::Watchdog;
use crate::server::logbuffer::LogBuffer;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Settings snapshotted from [`Config`] at startup. Everything here is
/// immutable for the life of the listener; hot-reloadable values are read
/// back through `config` instead.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub feed_name: String,
    pub secure: bool,
    pub port: u16,
    pub dashboard_port: u16,
    pub doc_id_path: String,
    pub full_access_hosts: Vec<IpAddr>,
    pub mark_all_docs_public: bool,
    pub send_doc_controls: bool,
    pub header_timeout: Duration,
    pub content_timeout: Duration,
    pub gsa_version: GsaVersion,
    pub shutdown_timeout: Duration,
}

/// Everything the HTTP surface and the background jobs share.
pub struct AppState {
    pub config: Arc<Config>,
    pub settings: ServerSettings,
    pub adaptor: Arc<dyn Adaptor>,
    pub journal: Arc<Journal>,
    pub codec: DocIdCodec,
    pub doc_id_sender: Arc<DocIdSender>,
    pub async_sender: AsyncDocIdSender,
    pub watchdog: Arc<Watchdog>,
    pub shutdown_waiter: Arc<ShutdownWaiter>,
    pub sessions: Arc<SessionManager>,
    pub saml: Arc<SamlServiceProvider>,
    pub transform: TransformPipeline,
    pub metadata_transform: TransformPipeline,
    pub time: Arc<dyn TimeSource>,
    pub log_buffer: Arc<LogBuffer>,
    pub log_reload: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    /// Monotonic id generator for exchange workers.
    pub next_worker_id: AtomicU64,
}

impl AppState {
    pub fn allocate_worker_id(&self) -> u64 {
        self.next_worker_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
