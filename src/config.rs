use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AgentError, AgentResult};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_DEPLOYMENT_OWNER: &str = "rapidstart";
pub const DEFAULT_DEPLOYMENT_NAME: &str = "omni-dev";

#[derive(Clone)]
pub struct PlannerConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Clone)]
pub struct VisionConfig {
    pub api_token: String,
    pub deployment_owner: String,
    pub deployment_name: String,
    pub base_url: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for one remote prediction.
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn deployment_id(&self) -> String {
        format!("{}/{}", self.deployment_owner, self.deployment_name)
    }
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub file_name: String,
    pub default_filter: String,
}

/// Everything the collaborators need, built once at startup and handed to
/// each constructor.
#[derive(Clone)]
pub struct AppConfig {
    pub planner: PlannerConfig,
    pub vision: VisionConfig,
    pub http: HttpConfig,
    pub log: LogSettings,
    /// The `.env` file that was read, if any. Reported once logging is up.
    pub env_file: Option<PathBuf>,
}

impl AppConfig {
    /// Read `.env` (if present) and the process environment.
    pub fn from_env() -> AgentResult<Self> {
        let env_file = dotenv::dotenv().ok();
        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        config.env_file = env_file;
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| AgentError::Config(format!("{} is not set", key)))
        };

        let planner = PlannerConfig {
            api_key: required("OPENAI_API_KEY")?,
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        let vision = VisionConfig {
            api_token: required("REPLICATE_API_TOKEN")?,
            deployment_owner: get("REPLICATE_DEPLOYMENT_OWNER")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT_OWNER.to_string()),
            deployment_name: get("REPLICATE_DEPLOYMENT_NAME")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT_NAME.to_string()),
            base_url: get("REPLICATE_BASE_URL").unwrap_or_else(|| DEFAULT_REPLICATE_BASE_URL.to_string()),
            poll_interval: Duration::from_millis(parse_or(&get, "VISION_POLL_INTERVAL_MS", 1000)?),
            timeout: Duration::from_secs(parse_or(&get, "VISION_TIMEOUT_SECS", 120)?),
        };

        let http = HttpConfig {
            timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 120)?),
            max_retries: parse_or(&get, "HTTP_MAX_RETRIES", 3)?,
        };

        let log = LogSettings {
            dir: PathBuf::from(get("AGENT_LOG_DIR").unwrap_or_else(|| "logs".to_string())),
            file_name: "agent.log".to_string(),
            default_filter: "info,reqwest=warn,hyper=warn".to_string(),
        };

        if vision.poll_interval.is_zero() {
            return Err(AgentError::Config("VISION_POLL_INTERVAL_MS must be > 0".to_string()));
        }

        Ok(Self { planner, vision, http, log, env_file: None })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> AgentResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AgentError::Config(format!("{} has an invalid value '{}'", key, raw))),
    }
}

fn set_or_not(value: &str) -> &'static str {
    if value.is_empty() { "not set" } else { "set" }
}

// Secrets never reach the logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("openai_key", &set_or_not(&self.planner.api_key))
            .field("openai_model", &self.planner.model)
            .field("replicate_token", &set_or_not(&self.vision.api_token))
            .field("replicate_deployment", &self.vision.deployment_id())
            .field("vision_timeout", &self.vision.timeout)
            .field("http", &self.http)
            .field("log_dir", &self.log.dir)
            .field("env_file", &self.env_file)
            .finish()
    }
}
