// src/server/initialization.rs

//! Handles the complete server initialization process: configuration
//! validation, key material, shared state construction, and listener
//! binding.

use crate::config::Config;
use crate::config::sensitive::SensitiveValueCodec;
use crate::core::acl::DomainFormat;
use crate::core::adaptor::Adaptor;
use crate::core::async_sender::{AsyncDocIdSender, AsyncPushWorker};
use crate::core::docid::DocIdCodec;
use crate::core::errors::FeedgateError;
use crate::core::feed::GsaVersion;
use crate::core::feed::docid_sender::DocIdSender;
use crate::core::feed::sender::GsaFeedFileSender;
use crate::core::feed::xml::GsaFeedFileMaker;
use crate::core::journal::Journal;
use crate::core::saml::service_provider::SamlServiceProvider;
use crate::core::session::SessionManager;
use crate::core::shutdown::ShutdownWaiter;
use crate::core::time::{SystemTimeSource, TimeSource};
use crate::core::transform::{TransformPipeline, TransformRegistry};
use crate::core::watchdog::Watchdog;
use crate::server::context::{AppState, ServerSettings};
use crate::server::logbuffer::LogBuffer;
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use std::collections::BTreeMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};
use url::Url;

/// Queue sizing for the async push path.
const ASYNC_QUEUE_CAPACITY: usize = 10_000;
const ASYNC_MAX_LATENCY: Duration = Duration::from_secs(5);

/// Everything `run` needs after setup: shared state plus the process-level
/// plumbing.
pub struct ServerContext {
    pub state: Arc<AppState>,
    pub listener: TcpListener,
    pub dashboard_listener: Option<TcpListener>,
    pub tls_acceptor: Option<TlsAcceptor>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<anyhow::Result<()>>,
    pub push_worker: Option<AsyncPushWorker>,
    pub push_cancel: CancellationToken,
}

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Arc<Config>,
    adaptor: Arc<dyn Adaptor>,
    transforms: &TransformRegistry,
    log_reload: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    log_buffer: Arc<LogBuffer>,
) -> Result<ServerContext, FeedgateError> {
    config.validate()?;

    // The keypair doubles as the root of the sensitive-value codec, so it
    // is loaded before anyone reads a config value that may be sealed.
    let signing_key = Arc::new(load_or_generate_keypair(&config)?);
    install_sensitive_codec(&config, &signing_key)?;

    // The adaptor may declare extra keys and read its own configuration
    // before anything listens.
    adaptor.init(&config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

    let settings = read_settings(&config)?;
    info!(
        "Feed '{}' will be served to indexer '{}' (version {}).",
        settings.feed_name,
        config.get_value("gsa.hostname")?,
        settings.gsa_version
    );

    let journal = Arc::new(Journal::new(
        time.clone(),
        config.get_bool("journal.reducedMem")?,
    ));
    let sessions = Arc::new(SessionManager::new(
        time.clone(),
        Duration::from_secs(config.get_int("session.maxAgeSecs")?.max(1) as u64),
    ));

    let codec = build_codec(&config, &settings)?;
    let domain_format: DomainFormat = config
        .get_value("adaptor.domainFormat")?
        .parse()
        .map_err(|_| {
            FeedgateError::InvalidConfiguration("adaptor.domainFormat".to_string())
        })?;
    let maker = GsaFeedFileMaker::new(codec.clone(), domain_format)
        .crawl_immediately_enabled(config.get_bool("feed.crawlImmediatelyBitEnabled")?)
        .legacy_authmethod_workaround(config.get_bool("gsa.614FeedWorkaroundEnabled")?);

    let feed_sender = GsaFeedFileSender::new(
        &config.get_value("gsa.hostname")?,
        settings.secure,
        true,
    )?;
    let archive_dir = {
        let dir = config.get_value("feed.archiveDirectory")?;
        if dir.trim().is_empty() {
            None
        } else {
            let path = PathBuf::from(dir);
            std::fs::create_dir_all(&path)?;
            Some(path)
        }
    };

    let push_cancel = CancellationToken::new();
    let doc_id_sender = Arc::new(DocIdSender::new(
        maker,
        Arc::new(feed_sender),
        journal.clone(),
        settings.feed_name.clone(),
        config.get_int("feed.maxUrls")?.max(1) as usize,
        settings.mark_all_docs_public,
        settings.gsa_version,
        archive_dir,
        push_cancel.clone(),
    ));

    let (async_sender, push_worker) = AsyncDocIdSender::new(
        doc_id_sender.clone(),
        ASYNC_QUEUE_CAPACITY,
        config.get_int("feed.maxUrls")?.max(1) as usize,
        ASYNC_MAX_LATENCY,
    );

    let saml = Arc::new(build_saml_sp(&config, &codec, signing_key, time.clone())?);

    let (transform, metadata_transform) = build_pipelines(&config, transforms)?;

    let state = Arc::new(AppState {
        config: config.clone(),
        settings: settings.clone(),
        adaptor,
        journal,
        codec,
        doc_id_sender,
        async_sender,
        watchdog: Arc::new(Watchdog::new()),
        shutdown_waiter: Arc::new(ShutdownWaiter::new()),
        sessions,
        saml,
        transform,
        metadata_transform,
        time,
        log_buffer,
        log_reload,
        next_worker_id: AtomicU64::new(1),
    });

    let tls_acceptor = if settings.secure {
        Some(setup_tls(&config)?)
    } else {
        None
    };

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .map_err(|e| {
            FeedgateError::StartupTransient(format!(
                "cannot bind content listener on port {}: {e}",
                settings.port
            ))
        })?;
    let dashboard_listener = TcpListener::bind(("0.0.0.0", settings.dashboard_port))
        .await
        .map_err(|e| {
            FeedgateError::StartupTransient(format!(
                "cannot bind dashboard listener on port {}: {e}",
                settings.dashboard_port
            ))
        })?;
    info!(
        "Content endpoint listening on port {} ({}), dashboard on port {}.",
        settings.port,
        if settings.secure { "https" } else { "http" },
        settings.dashboard_port
    );

    Ok(ServerContext {
        state,
        listener,
        dashboard_listener: Some(dashboard_listener),
        tls_acceptor,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        push_worker: Some(push_worker),
        push_cancel,
    })
}

fn read_settings(config: &Config) -> Result<ServerSettings, FeedgateError> {
    let gsa_version: GsaVersion = config.get_value("gsa.version")?.parse()?;
    Ok(ServerSettings {
        feed_name: config.get_value("feed.name")?,
        secure: config.get_bool("server.secure")?,
        port: config.get_int("server.port")? as u16,
        dashboard_port: config.get_int("server.dashboardPort")? as u16,
        doc_id_path: config.get_value("server.docIdPath")?,
        full_access_hosts: resolve_full_access_hosts(config),
        mark_all_docs_public: config.get_bool("adaptor.markAllDocsAsPublic")?,
        send_doc_controls: config.get_bool("server.sendDocControls")?,
        // The adaptor-facing deadline is the computed seconds key so an
        // explicit adaptor.docHeaderTimeoutSecs override wins over the
        // millisecond setting it is otherwise derived from.
        header_timeout: Duration::from_secs(
            config.get_int("adaptor.docHeaderTimeoutSecs")?.max(1) as u64,
        ),
        content_timeout: config.get_millis("server.contentTimeoutMillis")?,
        gsa_version,
        shutdown_timeout: Duration::from_secs(10),
    })
}

/// The indexer's own addresses always get full access; operators add more
/// through `server.fullAccessHosts`.
fn resolve_full_access_hosts(config: &Config) -> Vec<IpAddr> {
    let mut hosts = Vec::new();
    let mut names: Vec<String> = Vec::new();
    if let Ok(gsa) = config.get_value("gsa.hostname") {
        names.push(gsa);
    }
    if let Ok(admin) = config.get_value("gsa.admin.hostname") {
        if !admin.trim().is_empty() {
            names.push(admin);
        }
    }
    if let Ok(extra) = config.get_value("server.fullAccessHosts") {
        names.extend(
            extra
                .split([',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    for name in names {
        if let Ok(ip) = name.parse::<IpAddr>() {
            hosts.push(ip);
            continue;
        }
        match (name.as_str(), 0u16).to_socket_addrs() {
            Ok(addrs) => hosts.extend(addrs.map(|a| a.ip())),
            Err(e) => warn!("Cannot resolve full-access host '{name}': {e}"),
        }
    }
    hosts
}

fn build_codec(config: &Config, settings: &ServerSettings) -> Result<DocIdCodec, FeedgateError> {
    let scheme = if settings.secure { "https" } else { "http" };
    let hostname = config.get_value("server.hostname")?;
    let base = Url::parse(&format!(
        "{scheme}://{hostname}:{}{}",
        settings.port, settings.doc_id_path
    ))
    .map_err(|e| {
        FeedgateError::InvalidConfiguration(format!(
            "server.hostname '{hostname}' does not form a content URL: {e}"
        ))
    })?;
    Ok(DocIdCodec::new(base, config.get_bool("docId.isUrl")?))
}

fn build_saml_sp(
    config: &Config,
    codec: &DocIdCodec,
    signing_key: Arc<RsaPrivateKey>,
    time: Arc<dyn TimeSource>,
) -> Result<SamlServiceProvider, FeedgateError> {
    let gsa = config.get_value("gsa.hostname")?;
    let sso_url = {
        let configured = config.get_value("saml.idpSsoUrl")?;
        if configured.trim().is_empty() {
            Url::parse(&format!("https://{gsa}/security-manager/samlauthn"))
        } else {
            Url::parse(&configured)
        }
    }
    .map_err(|e| FeedgateError::InvalidConfiguration(format!("saml.idpSsoUrl: {e}")))?;
    let artifact_url = {
        let configured = config.get_value("saml.idpArtifactResolveUrl")?;
        if configured.trim().is_empty() {
            Url::parse(&format!("https://{gsa}/security-manager/samlartifact"))
        } else {
            Url::parse(&configured)
        }
    }
    .map_err(|e| {
        FeedgateError::InvalidConfiguration(format!("saml.idpArtifactResolveUrl: {e}"))
    })?;

    let mut acs_url = codec.base_uri().clone();
    acs_url.set_path("/saml-assertion-consumer");
    acs_url.set_query(None);

    let client = reqwest::Client::builder()
        .timeout(config.get_millis("saml.idpExpirationMillis")?)
        .use_rustls_tls()
        .danger_accept_invalid_certs(false)
        .build()
        .map_err(|e| FeedgateError::Internal(format!("HTTP client construction: {e}")))?;

    Ok(SamlServiceProvider::new(
        config.get_value("server.samlEntityId")?,
        acs_url,
        config.get_value("saml.idpEntityId")?,
        sso_url,
        artifact_url,
        signing_key,
        client,
        time,
    ))
}

/// Derives the sensitive-value codec from the server keypair and installs
/// it on the config store. With a persistent keypair, `obf:` values keep
/// decoding across restarts; an ephemeral keypair means an ephemeral
/// obfuscation secret.
fn install_sensitive_codec(
    config: &Config,
    keypair: &Arc<RsaPrivateKey>,
) -> Result<(), FeedgateError> {
    use rsa::pkcs8::EncodePrivateKey;
    use sha2::{Digest, Sha256};

    let der = keypair
        .to_pkcs8_der()
        .map_err(|e| FeedgateError::Internal(format!("keypair encoding failed: {e}")))?;
    let secret: [u8; 32] = Sha256::digest(der.as_bytes()).into();
    config.set_sensitive_value_codec(Arc::new(SensitiveValueCodec::new(
        secret,
        Some((**keypair).clone()),
    )));
    Ok(())
}

/// Loads the SP keypair from `server.keyStorePath` (PKCS#8 PEM), or
/// generates an ephemeral one.
fn load_or_generate_keypair(config: &Config) -> Result<RsaPrivateKey, FeedgateError> {
    let path = config.get_value("server.keyStorePath")?;
    if !path.trim().is_empty() {
        let pem = std::fs::read_to_string(&path).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!(
                "cannot read server.keyStorePath '{path}': {e}"
            ))
        })?;
        return RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!(
                "server.keyStorePath '{path}' is not a PKCS#8 RSA key: {e}"
            ))
        });
    }
    info!("No keypair configured; generating an ephemeral RSA key.");
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
        .map_err(|e| FeedgateError::Internal(format!("key generation failed: {e}")))
}

fn build_pipelines(
    config: &Config,
    transforms: &TransformRegistry,
) -> Result<(TransformPipeline, TransformPipeline), FeedgateError> {
    let stage_config = collect_stage_config(config, "transform.pipeline");
    let content = transforms
        .build_pipeline(&config.get_value("transform.pipeline")?, &stage_config)?;
    let metadata_stage_config = collect_stage_config(config, "metadata.transform.pipeline");
    let metadata = transforms.build_pipeline(
        &config.get_value("metadata.transform.pipeline")?,
        &metadata_stage_config,
    )?;
    Ok((content, metadata))
}

/// Collects `<prefix>.<stage>.<key>=<value>` entries into per-stage maps.
fn collect_stage_config(
    config: &Config,
    prefix: &str,
) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut out: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let dotted = format!("{prefix}.");
    for (key, value) in config.effective_values() {
        if let Some(rest) = key.strip_prefix(&dotted) {
            if let Some((stage, param)) = rest.split_once('.') {
                out.entry(stage.to_string())
                    .or_default()
                    .insert(param.to_string(), value);
            }
        }
    }
    out
}

/// Sets up the TLS acceptor when the content endpoint is secure.
fn setup_tls(config: &Config) -> Result<TlsAcceptor, FeedgateError> {
    let cert_path = config.get_value("server.tlsCertPath")?;
    let key_path = config.get_value("server.tlsKeyPath")?;
    info!("TLS is enabled. Loading certificate and key.");

    let cert_file = std::fs::File::open(&cert_path).map_err(|e| {
        FeedgateError::InvalidConfiguration(format!(
            "failed to open certificate file '{cert_path}': {e}"
        ))
    })?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("bad certificate file: {e}"))
        })?;
    if certs.is_empty() {
        return Err(FeedgateError::InvalidConfiguration(format!(
            "no certificates found in '{cert_path}'"
        )));
    }

    let key_file = std::fs::File::open(&key_path).map_err(|e| {
        FeedgateError::InvalidConfiguration(format!(
            "failed to open private key file '{key_path}': {e}"
        ))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| FeedgateError::InvalidConfiguration(format!("bad key file: {e}")))?
        .ok_or_else(|| {
            FeedgateError::InvalidConfiguration(format!(
                "no private key found in '{key_path}'"
            ))
        })?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| FeedgateError::InvalidConfiguration(format!("TLS setup failed: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
