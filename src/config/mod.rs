// src/config/mod.rs

//! Manages adaptor configuration: declared keys, file loading, hot reload
//! with change notification, and validation.
//!
//! Unlike a serde-mapped config, the key space here is open: transform
//! stages and adaptor implementations declare their own keys at startup.
//! The store keeps raw string values plus per-key metadata (default value,
//! optional value computer) and re-reads its backing file when the file's
//! modification time advances.

pub mod properties;
pub mod sensitive;

use crate::config::sensitive::SensitiveValueCodec;
use crate::core::errors::FeedgateError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// Computes the effective value of a key from its raw value and the rest of
/// the store. Used for values derived from other keys or the environment.
pub type ValueComputer = dyn Fn(&str, &ConfigView) -> String + Send + Sync;

/// Notification payload for a successful reload that changed at least one
/// effective value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigModificationEvent {
    pub modified_keys: BTreeSet<String>,
}

pub type ConfigListener = dyn Fn(&ConfigModificationEvent) + Send + Sync;

struct KeySpec {
    default: Option<String>,
    computer: Option<Arc<ValueComputer>>,
}

/// A read-only snapshot of raw values, handed to value computers so they can
/// consult sibling keys without re-entering the store's locks.
pub struct ConfigView<'a> {
    values: &'a HashMap<String, String>,
    declared: &'a HashMap<String, KeySpec>,
}

impl ConfigView<'_> {
    /// A sibling key's raw value: override first, declared default second.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .or_else(|| self.declared.get(key).and_then(|s| s.default.as_deref()))
    }
}

/// The configuration store.
///
/// `add_key`, `load`, and `ensure_latest_config_loaded` run on the control
/// thread; getters may run concurrently and observe either the pre- or
/// post-reload map, never a torn one (the backing map is swapped whole).
pub struct Config {
    declared: RwLock<HashMap<String, KeySpec>>,
    /// Effective raw overrides (file contents plus explicit set_value calls).
    /// Values are stored as written; sensitive-value decoding happens on
    /// read.
    values: RwLock<Arc<HashMap<String, String>>>,
    source: Mutex<Option<ConfigSource>>,
    listeners: Mutex<Vec<Box<ConfigListener>>>,
    codec: RwLock<Arc<SensitiveValueCodec>>,
}

struct ConfigSource {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// An empty store with no declared keys. Most callers want
    /// [`Config::with_default_keys`].
    pub fn new() -> Self {
        Self {
            declared: RwLock::new(HashMap::new()),
            values: RwLock::new(Arc::new(HashMap::new())),
            source: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            // The ephemeral codec handles `pl:` values out of the box;
            // `obf:`/`pkc:` need the instance codec installed at startup.
            codec: RwLock::new(Arc::new(SensitiveValueCodec::ephemeral())),
        }
    }

    /// Installs the codec used to decode `pl:`/`obf:`/`pkc:` values on
    /// every read. Called once at startup, after the server keypair is
    /// available.
    pub fn set_sensitive_value_codec(&self, codec: Arc<SensitiveValueCodec>) {
        *self.codec.write() = codec;
    }

    /// A store pre-populated with every key the framework itself consumes.
    pub fn with_default_keys() -> Self {
        let config = Self::new();
        config.add_framework_keys();
        config
    }

    fn add_framework_keys(&self) {
        let defaults: &[(&str, &str)] = &[
            ("gsa.hostname", ""),
            ("gsa.admin.hostname", ""),
            ("gsa.version", "7.2.0-0"),
            ("gsa.scoringType", "content"),
            ("gsa.614FeedWorkaroundEnabled", "false"),
            ("feed.name", "adaptor"),
            ("feed.maxUrls", "5000"),
            ("feed.archiveDirectory", ""),
            ("feed.crawlImmediatelyBitEnabled", "true"),
            ("server.port", "5678"),
            ("server.dashboardPort", "5679"),
            ("server.secure", "false"),
            ("server.keyStorePath", ""),
            ("server.tlsCertPath", "feedgate.crt"),
            ("server.tlsKeyPath", "feedgate.key"),
            ("server.fullAccessHosts", ""),
            ("server.docIdPath", "/doc/"),
            ("server.headerTimeoutMillis", "30000"),
            ("server.contentTimeoutMillis", "180000"),
            ("server.samlEntityId", "http://google.com/enterprise/gsa/adaptor"),
            ("server.sendDocControls", "true"),
            ("adaptor.fullListingSchedule", "0 3 * * *"),
            ("adaptor.incrementalPollPeriodSecs", "900"),
            ("adaptor.pushDocIdsOnStartup", "true"),
            ("adaptor.markAllDocsAsPublic", "false"),
            ("adaptor.domainFormat", "DNS"),
            ("adaptor.env.file", ""),
            ("docId.isUrl", "false"),
            ("transform.pipeline", ""),
            ("metadata.transform.pipeline", ""),
            ("journal.reducedMem", "true"),
            ("saml.idpExpirationMillis", "30000"),
            ("saml.idpEntityId", "http://google.com/enterprise/gsa/security-manager"),
            ("saml.idpSsoUrl", ""),
            ("saml.idpArtifactResolveUrl", ""),
            ("session.maxAgeSecs", "1800"),
        ];
        for (key, default) in defaults {
            // Framework keys are registered exactly once at construction.
            self.add_key(key, Some(default))
                .expect("framework key declared twice");
        }
        self.add_computed_key("server.hostname", Some(""), |raw, _view| {
            if raw.is_empty() {
                local_hostname()
            } else {
                raw.to_string()
            }
        })
        .expect("framework key declared twice");
        // The adaptor-facing header deadline, in whole seconds. Unless set
        // explicitly it tracks server.headerTimeoutMillis, rounded up.
        self.add_computed_key("adaptor.docHeaderTimeoutSecs", Some(""), |raw, view| {
            if !raw.is_empty() {
                return raw.to_string();
            }
            let millis: u64 = view
                .raw("server.headerTimeoutMillis")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(30_000);
            millis.div_ceil(1_000).to_string()
        })
        .expect("framework key declared twice");
    }

    /// Declares a key. Fails when the key was already declared.
    pub fn add_key(&self, name: &str, default: Option<&str>) -> Result<(), FeedgateError> {
        let mut declared = self.declared.write();
        if declared.contains_key(name) {
            return Err(FeedgateError::AlreadyDefined(name.to_string()));
        }
        declared.insert(
            name.to_string(),
            KeySpec {
                default: default.map(str::to_string),
                computer: None,
            },
        );
        Ok(())
    }

    /// Declares a key whose effective value is derived from its raw value.
    pub fn add_computed_key<F>(
        &self,
        name: &str,
        default: Option<&str>,
        computer: F,
    ) -> Result<(), FeedgateError>
    where
        F: Fn(&str, &ConfigView) -> String + Send + Sync + 'static,
    {
        let mut declared = self.declared.write();
        if declared.contains_key(name) {
            return Err(FeedgateError::AlreadyDefined(name.to_string()));
        }
        declared.insert(
            name.to_string(),
            KeySpec {
                default: default.map(str::to_string),
                computer: Some(Arc::new(computer)),
            },
        );
        Ok(())
    }

    /// Overrides a value in place, affecting subsequent reads. The key does
    /// not need to be declared; adaptor- and transform-specific keys arrive
    /// this way from `-D` flags.
    pub fn set_value(&self, name: &str, raw: &str) {
        let mut values = self.values.write();
        let mut next = (**values).clone();
        next.insert(name.to_string(), raw.to_string());
        *values = Arc::new(next);
    }

    /// The raw value of a key: override, then declared default. Sensitive
    /// values are decoded transparently; consumers never see the stored
    /// `pl:`/`obf:`/`pkc:` forms.
    pub fn get_raw_value(&self, name: &str) -> Result<String, FeedgateError> {
        let values = self.values.read().clone();
        if let Some(v) = values.get(name) {
            return self.decode_sensitive(v);
        }
        let declared = self.declared.read();
        match declared.get(name) {
            Some(spec) => Ok(spec.default.clone().unwrap_or_default()),
            None => Err(FeedgateError::NotDefined(name.to_string())),
        }
    }

    fn decode_sensitive(&self, stored: &str) -> Result<String, FeedgateError> {
        let codec = self.codec.read().clone();
        codec.decode(stored)
    }

    /// The effective value of a key: the raw value passed through the key's
    /// computer when one is registered.
    pub fn get_value(&self, name: &str) -> Result<String, FeedgateError> {
        let raw = self.get_raw_value(name)?;
        let declared = self.declared.read();
        let Some(computer) = declared.get(name).and_then(|s| s.computer.clone()) else {
            return Ok(raw);
        };
        let values = self.values.read().clone();
        let view = ConfigView {
            values: &values,
            declared: &declared,
        };
        Ok(computer(&raw, &view))
    }

    /// Every key that currently resolves to a value, with its effective
    /// value. Used by the dashboard's getConfig RPC.
    pub fn effective_values(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let names: Vec<String> = {
            let declared = self.declared.read();
            declared.keys().cloned().collect()
        };
        for name in names {
            if let Ok(v) = self.get_value(&name) {
                out.insert(name, v);
            }
        }
        let values = self.values.read().clone();
        for (k, v) in values.iter() {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        out
    }

    // --- typed getters ---

    pub fn get_bool(&self, name: &str) -> Result<bool, FeedgateError> {
        match self.get_value(name)?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(FeedgateError::InvalidConfiguration(format!(
                "{name} must be 'true' or 'false', got '{other}'"
            ))),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, FeedgateError> {
        let v = self.get_value(name)?;
        v.trim().parse().map_err(|_| {
            FeedgateError::InvalidConfiguration(format!("{name} must be an integer, got '{v}'"))
        })
    }

    pub fn get_millis(&self, name: &str) -> Result<std::time::Duration, FeedgateError> {
        let n = self.get_int(name)?;
        if n < 0 {
            return Err(FeedgateError::InvalidConfiguration(format!(
                "{name} must be non-negative"
            )));
        }
        Ok(std::time::Duration::from_millis(n as u64))
    }

    pub fn get_url(&self, name: &str) -> Result<url::Url, FeedgateError> {
        let v = self.get_value(name)?;
        url::Url::parse(&v).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!("{name} must be a URL, got '{v}': {e}"))
        })
    }

    // --- file loading and hot reload ---

    /// Loads a properties file, replacing the current override map. The path
    /// is remembered for [`Config::ensure_latest_config_loaded`].
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), FeedgateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let parsed = self.parse_overrides(&contents)?;
        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        *self.values.write() = Arc::new(parsed);
        *self.source.lock() = Some(ConfigSource {
            path: path.to_path_buf(),
            last_modified: mtime,
        });
        info!("Loaded configuration from '{}'.", path.display());
        Ok(())
    }

    /// Parses a properties stream directly, without file bookkeeping.
    pub fn load_from_string(&self, contents: &str) -> Result<(), FeedgateError> {
        let parsed = self.parse_overrides(contents)?;
        *self.values.write() = Arc::new(parsed);
        Ok(())
    }

    fn parse_overrides(&self, contents: &str) -> Result<HashMap<String, String>, FeedgateError> {
        let mut map = HashMap::new();
        for (k, v) in properties::parse(contents)? {
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Registers a listener for reload change events.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&ConfigModificationEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Re-reads the backing file iff its modification time advanced since
    /// the last (re)load. The new contents only become visible, and the
    /// change event only fires, when validation of the candidate passes;
    /// otherwise the in-memory state is untouched.
    ///
    /// Returns `true` when a reload actually happened.
    pub fn ensure_latest_config_loaded(&self) -> Result<bool, FeedgateError> {
        let (path, previous_mtime) = {
            let source = self.source.lock();
            match source.as_ref() {
                Some(s) => (s.path.clone(), s.last_modified),
                None => return Ok(false),
            }
        };

        let current_mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    "Cannot stat config file '{}' for reload: {e}",
                    path.display()
                );
                return Ok(false);
            }
        };
        if previous_mtime.is_some_and(|prev| current_mtime <= prev) {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            FeedgateError::InvalidConfiguration(format!(
                "failed to re-read config file '{}': {e}",
                path.display()
            ))
        })?;
        let candidate = self.parse_overrides(&contents)?;

        // Validate against the candidate before making anything visible.
        self.validate_map(&candidate)?;

        let modified_keys = {
            let mut values = self.values.write();
            let old = values.clone();
            let mut keys: BTreeSet<String> = BTreeSet::new();
            for (k, v) in candidate.iter() {
                if old.get(k) != Some(v) {
                    keys.insert(k.clone());
                }
            }
            for k in old.keys() {
                if !candidate.contains_key(k) {
                    keys.insert(k.clone());
                }
            }
            *values = Arc::new(candidate);
            keys
        };

        {
            let mut source = self.source.lock();
            if let Some(s) = source.as_mut() {
                s.last_modified = Some(current_mtime);
            }
        }

        if modified_keys.is_empty() {
            return Ok(false);
        }

        info!(
            "Configuration reloaded; {} key(s) changed.",
            modified_keys.len()
        );
        let event = ConfigModificationEvent { modified_keys };
        for listener in self.listeners.lock().iter() {
            listener(&event);
        }
        Ok(true)
    }

    // --- validation ---

    /// Validates the live configuration. Called once at startup; failures
    /// abort with exit code 2.
    pub fn validate(&self) -> Result<(), FeedgateError> {
        let values = self.values.read().clone();
        self.validate_map(&values)
    }

    fn validate_map(&self, overrides: &HashMap<String, String>) -> Result<(), FeedgateError> {
        let effective = |name: &str| -> String {
            if let Some(v) = overrides.get(name) {
                return v.clone();
            }
            self.declared
                .read()
                .get(name)
                .and_then(|s| s.default.clone())
                .unwrap_or_default()
        };

        if effective("gsa.hostname").trim().is_empty() {
            return Err(FeedgateError::InvalidConfiguration(
                "gsa.hostname is required".to_string(),
            ));
        }

        let scoring = effective("gsa.scoringType");
        if scoring != "content" && scoring != "web" {
            return Err(FeedgateError::InvalidConfiguration(format!(
                "gsa.scoringType must be 'content' or 'web', got '{scoring}'"
            )));
        }

        for bool_key in [
            "server.secure",
            "adaptor.pushDocIdsOnStartup",
            "adaptor.markAllDocsAsPublic",
            "docId.isUrl",
            "feed.crawlImmediatelyBitEnabled",
            "server.sendDocControls",
        ] {
            let v = effective(bool_key);
            if v != "true" && v != "false" {
                return Err(FeedgateError::InvalidConfiguration(format!(
                    "{bool_key} must be 'true' or 'false', got '{v}'"
                )));
            }
        }

        for int_key in ["feed.maxUrls", "server.port", "server.dashboardPort"] {
            let v = effective(int_key);
            match v.trim().parse::<i64>() {
                Ok(n) if n >= 0 => {}
                _ => {
                    return Err(FeedgateError::InvalidConfiguration(format!(
                        "{int_key} must be a non-negative integer, got '{v}'"
                    )));
                }
            }
        }
        if effective("feed.maxUrls").trim().parse::<i64>().unwrap_or(0) == 0 {
            return Err(FeedgateError::InvalidConfiguration(
                "feed.maxUrls cannot be 0".to_string(),
            ));
        }

        let format = effective("adaptor.domainFormat");
        if format.parse::<crate::core::acl::DomainFormat>().is_err() {
            return Err(FeedgateError::InvalidConfiguration(format!(
                "adaptor.domainFormat must be one of DNS, NETBIOS, NETBIOSFORWARDSLASH, NONE; got '{format}'"
            )));
        }

        Ok(())
    }
}

/// Parses the 5-field cron expression used by `adaptor.fullListingSchedule`.
/// The `cron` crate wants a seconds field, so one is prepended.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, FeedgateError> {
    use std::str::FromStr;
    let with_seconds = format!("0 {}", expr.trim());
    cron::Schedule::from_str(&with_seconds).map_err(|e| {
        FeedgateError::InvalidConfiguration(format!("invalid cron expression '{expr}': {e}"))
    })
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
