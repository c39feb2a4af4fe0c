//! Logging setup shared by the relay bridge and the CLI
//!
//! Console output always uses the bracketed `timestamp [LEVEL] message` format.
//! With a log directory, service logs and `api_access` events go to separate
//! daily files; a background sweep gzips old files and removes old archives.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Target used by [`http_request_logger`]; routed to its own file.
pub const API_ACCESS_TARGET: &str = "api_access";

/// Env var that overrides the configured log directory
pub const LOG_DIR_ENV: &str = "ESSRV_LOG_DIR";

/// Size at which a daily file continues in a numbered segment
const SEGMENT_MAX_BYTES: u64 = 100 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Event format
// ---------------------------------------------------------------------------

/// `2025-12-02T00:50:44.809000Z [INFO] Relay bridge listening on ...`
struct Bracketed;

fn level_tag(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
    }
}

impl<S, N> FormatEvent<S, N> for Bracketed
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        let (tag, color) = level_tag(*event.metadata().level());
        if writer.has_ansi_escapes() {
            write!(writer, "{} {}{}\x1b[0m ", stamp, color, tag)?;
        } else {
            write!(writer, "{} {} ", stamp, tag)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ---------------------------------------------------------------------------
// Daily files
// ---------------------------------------------------------------------------

/// Which stream a daily file carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Service,
    ApiAccess,
}

impl LogStream {
    fn suffix(self) -> &'static str {
        match self {
            Self::Service => "",
            Self::ApiAccess => "_api",
        }
    }

    /// `{YYYYMMDD}_{service}{suffix}.log`, or `.{segment}.log` past the first
    pub fn file_name(self, date: &str, service: &str, segment: u32) -> String {
        match segment {
            0 => format!("{}_{}{}.log", date, service, self.suffix()),
            n => format!("{}_{}{}.{}.log", date, service, self.suffix(), n),
        }
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Append-only writer that switches files on a new day or a full segment
struct DailyFile {
    dir: PathBuf,
    service: String,
    stream: LogStream,
    max_bytes: u64,
    date: String,
    segment: u32,
    written: u64,
    file: File,
}

impl DailyFile {
    fn open(dir: &Path, service: &str, stream: LogStream) -> io::Result<Self> {
        let date = today();
        let file = Self::append(dir, &stream.file_name(&date, service, 0))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            dir: dir.to_path_buf(),
            service: service.to_string(),
            stream,
            max_bytes: SEGMENT_MAX_BYTES,
            date,
            segment: 0,
            written,
            file,
        })
    }

    fn append(dir: &Path, name: &str) -> io::Result<File> {
        fs::create_dir_all(dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(name))
    }

    fn switch_if_needed(&mut self, incoming: usize) -> io::Result<()> {
        let date = today();
        let next_segment = if date != self.date {
            0
        } else if self.written + incoming as u64 > self.max_bytes {
            self.segment + 1
        } else {
            return Ok(());
        };

        let name = self.stream.file_name(&date, &self.service, next_segment);
        self.file = Self::append(&self.dir, &name)?;
        self.written = self.file.metadata().map(|m| m.len()).unwrap_or(0);
        self.date = date;
        self.segment = next_segment;
        Ok(())
    }
}

impl Write for DailyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.switch_if_needed(buf.len())?;
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `ESSRV_LOG_DIR` wins over the configured directory, which defaults to `logs`
pub fn resolve_log_dir(configured: Option<&str>) -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(configured.unwrap_or("logs")))
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used in file names and the default filter
    pub service_name: String,
    /// `None` logs to the console only
    pub log_dir: Option<PathBuf>,
    /// Default level when `RUST_LOG` is not set
    pub console_level: Level,
    pub ansi: bool,
    /// JSON lines in the service file instead of the bracketed format
    pub enable_json: bool,
    pub enable_api_log: bool,
    pub api_log_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "essrv".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            ansi: true,
            enable_json: false,
            enable_api_log: true,
            api_log_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// `RUST_LOG` when set, otherwise `{level},{service}=debug,api_access={api}`
    ///
    /// At the default INFO the service crate itself logs at DEBUG.
    fn filter_spec(&self, rust_log: Option<&str>) -> String {
        let api = if self.enable_api_log {
            self.api_log_level.as_str().to_lowercase()
        } else {
            "off".to_string()
        };
        match rust_log {
            Some(spec) if spec.contains(API_ACCESS_TARGET) => spec.to_string(),
            Some(spec) => format!("{},{}={}", spec, API_ACCESS_TARGET, api),
            None => {
                let base = self.console_level.as_str().to_lowercase();
                let service = match self.console_level {
                    Level::INFO => "debug".to_string(),
                    other => other.as_str().to_lowercase(),
                };
                format!(
                    "{},{}={},{}={}",
                    base, self.service_name, service, API_ACCESS_TARGET, api
                )
            },
        }
    }
}

/// Runtime handle on the active filter
struct FilterControl {
    handle: reload::Handle<EnvFilter, Registry>,
    spec: Mutex<String>,
}

static FILTER: OnceLock<FilterControl> = OnceLock::new();

// Keeps the non-blocking writers flushing for the lifetime of the process
static GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());

fn keep_guard(guard: WorkerGuard) {
    match GUARDS.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

fn file_layers<S>(config: &LogConfig, dir: &Path) -> io::Result<Vec<BoxedLayer<S>>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let not_api = || filter::filter_fn(|m| m.target() != API_ACCESS_TARGET);
    let only_api = || filter::filter_fn(|m| m.target() == API_ACCESS_TARGET);

    let service_file = DailyFile::open(dir, &config.service_name, LogStream::Service)?;
    let (writer, guard) = tracing_appender::non_blocking(service_file);
    keep_guard(guard);
    let mut layers: Vec<BoxedLayer<S>> = vec![if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(not_api())
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(Bracketed)
            .with_filter(not_api())
            .boxed()
    }];

    if config.enable_api_log {
        let (writer, guard) = tracing_appender::non_blocking(DailyFile::open(
            dir,
            &config.service_name,
            LogStream::ApiAccess,
        )?);
        keep_guard(guard);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(Bracketed)
                .with_filter(only_api())
                .boxed(),
        );
    }
    Ok(layers)
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed or the log directory cannot be
/// created.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let spec = config.filter_spec(std::env::var("RUST_LOG").ok().as_deref());
    let (filter_layer, handle) = reload::Layer::new(EnvFilter::try_new(&spec)?);

    let files = match &config.log_dir {
        Some(dir) => file_layers(&config, dir)?,
        None => Vec::new(),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(config.ansi).event_format(Bracketed))
        .with(files)
        .try_init()?;

    let _ = FILTER.set(FilterControl {
        handle,
        spec: Mutex::new(spec),
    });

    if let Some(dir) = config.log_dir {
        tracing::debug!("Logging {} to {}", config.service_name, dir.display());
        LogRetention::default().spawn(dir, config.service_name);
    }
    Ok(())
}

#[derive(Debug)]
pub enum LogLevelError {
    /// The filter string does not parse
    Invalid(String),
    /// No reloadable subscriber installed in this process
    NotInitialized,
    Reload(String),
}

impl std::fmt::Display for LogLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid log filter: {}", msg),
            Self::NotInitialized => f.write_str("logging is not initialized"),
            Self::Reload(msg) => write!(f, "failed to reload log filter: {}", msg),
        }
    }
}

impl std::error::Error for LogLevelError {}

/// Replace the filter at runtime (`"debug"`, `"info,essrv=trace"`, ...)
pub fn set_log_level(spec: &str) -> Result<(), LogLevelError> {
    let parsed =
        EnvFilter::try_new(spec).map_err(|e| LogLevelError::Invalid(format!("'{}': {}", spec, e)))?;
    let control = FILTER.get().ok_or(LogLevelError::NotInitialized)?;
    control
        .handle
        .reload(parsed)
        .map_err(|e| LogLevelError::Reload(e.to_string()))?;
    if let Ok(mut current) = control.spec.lock() {
        *current = spec.to_string();
    }
    tracing::info!("Log filter changed to '{}'", spec);
    Ok(())
}

/// Active filter string, `None` before [`init_with_config`]
pub fn get_log_level() -> Option<String> {
    FILTER
        .get()
        .and_then(|control| control.spec.lock().ok().map(|s| s.clone()))
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Age thresholds of the daily sweep
#[derive(Debug, Clone, Copy)]
pub struct LogRetention {
    /// Plain `.log` files older than this are gzipped
    pub compress_after: Duration,
    /// `.log.gz` archives older than this are removed
    pub delete_after: Duration,
}

impl Default for LogRetention {
    fn default() -> Self {
        Self {
            compress_after: Duration::from_secs(7 * 86_400),
            delete_after: Duration::from_secs(365 * 86_400),
        }
    }
}

/// Files touched by one sweep
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub compressed: usize,
    pub deleted: usize,
}

impl LogRetention {
    /// Sweep a minute after startup, then daily
    pub fn spawn(self, dir: PathBuf, service: String) {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let mut daily = tokio::time::interval(Duration::from_secs(86_400));
            loop {
                daily.tick().await;
                match self.sweep(&dir, &service).await {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::debug!("Log sweep for {}: {:?}", service, report)
                    },
                    Ok(_) => {},
                    Err(e) => tracing::error!("Log sweep for {} failed: {}", service, e),
                }
            }
        });
    }

    /// Only files carrying `_{service}` in their name are considered
    pub async fn sweep(&self, dir: &Path, service: &str) -> io::Result<SweepReport> {
        let marker = format!("_{}", service);
        let mut report = SweepReport::default();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !name.contains(&marker) {
                continue;
            }
            let age = entry
                .metadata()
                .await?
                .modified()
                .map(|m| SystemTime::now().duration_since(m).unwrap_or_default())?;

            if name.ends_with(".log") && age > self.compress_after {
                gzip(&path).await?;
                tokio::fs::remove_file(&path).await?;
                report.compressed += 1;
            } else if name.ends_with(".log.gz") && age > self.delete_after {
                tokio::fs::remove_file(&path).await?;
                report.deleted += 1;
            }
        }
        Ok(report)
    }
}

async fn gzip(path: &Path) -> io::Result<()> {
    let data = tokio::fs::read(path).await?;
    let target = PathBuf::from(format!("{}.gz", path.display()));
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(File::create(target)?, Compression::best());
        encoder.write_all(&data)?;
        encoder.finish().map(|_| ())
    })
    .await
    .map_err(io::Error::other)?
}

// ---------------------------------------------------------------------------
// HTTP access log
// ---------------------------------------------------------------------------

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "api-key",
    "secret",
    "authorization",
];

const REDACTED: &str = "***REDACTED***";

fn redact_value(value: &mut serde_json::Value) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|k| key.contains(k)) {
                    *val = Value::String(REDACTED.to_string());
                } else {
                    redact_value(val);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {},
    }
}

/// Mask values of credential-like keys at any depth; non-JSON passes through
pub fn redact_sensitive_fields(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(mut value) => {
            redact_value(&mut value);
            value.to_string()
        },
        Err(_) => body.to_string(),
    }
}

/// Cut on a char boundary and note how many bytes were dropped
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let cut = (0..=max_len)
        .rev()
        .find(|i| body.is_char_boundary(*i))
        .unwrap_or(0);
    format!("{}[truncated {} bytes]", &body[..cut], body.len() - cut)
}

/// Access log middleware for the `api_access` target
///
/// POST requests log at INFO, everything else at DEBUG. When DEBUG is
/// enabled, JSON POST bodies are logged too, redacted and cut to 500 bytes.
#[cfg(feature = "axum")]
pub async fn http_request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::body::Body;
    use axum::extract::Request;
    use tracing::{debug, info};

    const BODY_LOG_LIMIT: usize = 500;
    const BODY_READ_LIMIT: usize = 256 * 1024;

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = std::time::Instant::now();
    let is_post = method == axum::http::Method::POST;
    let is_json = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let (req, logged_body) = if is_post && is_json && tracing::level_enabled!(Level::DEBUG) {
        let (parts, body) = req.into_parts();
        match axum::body::to_bytes(body, BODY_READ_LIMIT).await {
            Ok(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map(|s| truncate_body(&redact_sensitive_fields(s), BODY_LOG_LIMIT))
                    .unwrap_or_else(|_| "<binary data>".to_string());
                (Request::from_parts(parts, Body::from(bytes)), Some(text))
            },
            Err(e) => {
                tracing::warn!(target: "api_access", "Unreadable body on {} {}: {}", method, path, e);
                return next.run(Request::from_parts(parts, Body::empty())).await;
            },
        }
    } else {
        (req, None)
    };

    let response = next.run(req).await;
    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_millis() as u64;

    match (logged_body, is_post) {
        (Some(body), _) => debug!(
            target: "api_access",
            %method, %path, status, duration_ms, request_body = %body,
            "HTTP request"
        ),
        (None, true) => info!(
            target: "api_access",
            %method, %path, status, duration_ms,
            "HTTP request"
        ),
        (None, false) => debug!(
            target: "api_access",
            %method, %path, status, duration_ms,
            "HTTP request"
        ),
    }
    response
}
