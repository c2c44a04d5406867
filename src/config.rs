use std::{env, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub work_dir: PathBuf,
    pub template_path: Option<PathBuf>,
    /// `VIDEO_COMMAND`, split on whitespace into program and arguments.
    /// Quoting is not supported, so no single argument may contain spaces.
    pub video_command: String,
    pub capture: CaptureConfig,
    pub copy_timeout: Duration,
    pub redis_url: Option<String>,
    pub queue_channel: String,
    pub queue_capacity: usize,
    /// Finished jobs kept in the status map before the oldest are evicted.
    pub job_history_limit: usize,
    pub request_max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub chrome_executable: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub settle_delay: Duration,
    pub network_idle_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            viewport_width: 1200,
            viewport_height: 800,
            settle_delay: Duration::from_millis(1000),
            network_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            chrome_executable: env_opt("CHROME_EXECUTABLE").map(PathBuf::from),
            viewport_width: env_parse("VIEWPORT_WIDTH", |v: &u32| *v > 0)
                .unwrap_or(defaults.viewport_width),
            viewport_height: env_parse("VIEWPORT_HEIGHT", |v: &u32| *v > 0)
                .unwrap_or(defaults.viewport_height),
            settle_delay: env_parse("CAPTURE_SETTLE_MS", |_: &u64| true)
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            network_idle_timeout: env_parse("NETWORK_IDLE_TIMEOUT_SECS", |v: &u64| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.network_idle_timeout),
        };

        Self {
            port: env_parse("PORT", |_: &u16| true).unwrap_or(8000),
            work_dir: env_opt("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("work")),
            template_path: env_opt("TEMPLATE_PATH").map(PathBuf::from),
            video_command: env_opt("VIDEO_COMMAND")
                .unwrap_or_else(|| "sh scripts/make-videos.sh".to_string()),
            capture,
            copy_timeout: env_parse("COPY_TIMEOUT_SECS", |v: &u64| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60)),
            redis_url: env_opt("REDIS_URL"),
            queue_channel: env_opt("QUEUE_CHANNEL")
                .unwrap_or_else(|| "product_listing_queue".to_string()),
            queue_capacity: env_parse("QUEUE_CAPACITY", |v: &usize| *v > 0).unwrap_or(64),
            job_history_limit: env_parse("JOB_HISTORY_LIMIT", |v: &usize| *v > 0)
                .unwrap_or(256),
            request_max_bytes: env_parse("REQUEST_MAX_BYTES", |v: &usize| *v > 0)
                .unwrap_or(256 * 1024),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    env_opt(key)
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| accept(value))
}
