use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_UPLOAD_URL: &str = "https://api.cloudinary.com";
const DEFAULT_DELIVERY_HOST: &str = "res.cloudinary.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cloudinary: CloudinaryConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
}

/// Credentials and endpoints for the hosted image store.
#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub secure: bool,
    pub upload_base_url: String,
    pub delivery_base_url: String,
    pub timeout: Option<Duration>,
}

// Keeps the secret out of startup logs.
impl std::fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("secure", &self.secure)
            .field("upload_base_url", &self.upload_base_url)
            .field("delivery_base_url", &self.delivery_base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CloudinaryConfig {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            secure: true,
            upload_base_url: DEFAULT_UPLOAD_URL.to_string(),
            delivery_base_url: default_delivery_url(true),
            timeout: None,
        }
    }

    /// Point both the upload API and image delivery at `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.upload_base_url = base_url.clone();
        self.delivery_base_url = base_url;
        self
    }
}

fn default_delivery_url(secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };
    format!("{}://{}", scheme, DEFAULT_DELIVERY_HOST)
}

/// Credentials carried by a `cloudinary://<api_key>:<api_secret>@<cloud_name>` URL.
fn parse_cloudinary_url(raw: &str) -> Result<(String, String, String)> {
    let url = Url::parse(raw).context("CLOUDINARY_URL is not a valid URL")?;
    if url.scheme() != "cloudinary" {
        bail!("CLOUDINARY_URL must use the cloudinary:// scheme");
    }

    let cloud_name = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| anyhow!("CLOUDINARY_URL is missing the cloud name"))?
        .to_string();
    let api_key = url.username().to_string();
    let api_secret = url.password().unwrap_or_default().to_string();

    Ok((cloud_name, api_key, api_secret))
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .unwrap_or_else(|| default.to_string())
        .parse()
        .with_context(|| format!("{} has an invalid value", key))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_file(path: &Path) -> Result<Self> {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let (url_cloud, url_key, url_secret) = match get("CLOUDINARY_URL") {
            Some(raw) => {
                let (c, k, s) = parse_cloudinary_url(&raw)?;
                (Some(c), Some(k), Some(s))
            }
            None => (None, None, None),
        };

        let secure: bool = parse_var(&get, "CLOUDINARY_SECURE", "true")?;

        Ok(Self {
            server: ServerConfig {
                port: parse_var(&get, "PORT", "8000")?,
                host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                max_upload_bytes: parse_var(&get, "MAX_UPLOAD_BYTES", "10485760")?,
            },
            cloudinary: CloudinaryConfig {
                cloud_name: get("CLOUDINARY_CLOUD_NAME")
                    .or(url_cloud)
                    .context("CLOUDINARY_CLOUD_NAME or CLOUDINARY_URL must be set")?,
                api_key: get("CLOUDINARY_API_KEY")
                    .or(url_key)
                    .context("CLOUDINARY_API_KEY or CLOUDINARY_URL must be set")?,
                api_secret: get("CLOUDINARY_API_SECRET")
                    .or(url_secret)
                    .context("CLOUDINARY_API_SECRET or CLOUDINARY_URL must be set")?,
                secure,
                upload_base_url: get("CLOUDINARY_UPLOAD_URL")
                    .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
                delivery_base_url: get("CLOUDINARY_DELIVERY_URL")
                    .unwrap_or_else(|| default_delivery_url(secure)),
                timeout: get("CLOUDINARY_TIMEOUT_SECS")
                    .map(|raw| {
                        raw.parse::<u64>()
                            .map(Duration::from_secs)
                            .context("CLOUDINARY_TIMEOUT_SECS has an invalid value")
                    })
                    .transpose()?,
            },
            service: ServiceConfig {
                name: get("SERVICE_NAME").unwrap_or_else(|| "image_service".to_string()),
            },
        })
    }
}
