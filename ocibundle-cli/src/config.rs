use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use ocibundle::{ClientOptions, Credential, Error, RepositoryReference, Result};

const ENV_PREFIX: &str = "OCIBUNDLE";

/// Values as collected from every source, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    image: Option<String>,
    username: Option<String>,
    password: Option<String>,
    files: Option<String>,
    output: PathBuf,
    plain_http: bool,
    concurrency: usize,
    timeout: Option<u64>,
}

/// Flag values that override every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub image: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub files: Option<String>,
    pub output: Option<PathBuf>,
    pub plain_http: bool,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
}

/// Settings for one invocation, built once at startup.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub image: RepositoryReference,
    pub credential: Credential,
    pub files: Vec<PathBuf>,
    pub output: PathBuf,
    pub client: ClientOptions,
}

impl BundleConfig {
    /// Load from defaults, an optional config file, `OCIBUNDLE_*`
    /// environment variables and finally the command line.
    pub fn load(overrides: &Overrides, require_files: bool) -> Result<Self> {
        Self::load_with_env(overrides, Environment::with_prefix(ENV_PREFIX), require_files)
    }

    fn load_with_env(
        overrides: &Overrides,
        environment: Environment,
        require_files: bool,
    ) -> Result<Self> {
        let mut builder: ConfigBuilder<DefaultState> = Config::builder()
            // Start with default values
            .set_default("output", ".")
            .and_then(|b| b.set_default("plain_http", false))
            .and_then(|b| b.set_default("concurrency", 1))
            .map_err(config_error)?;

        if let Some(path) = &overrides.config_file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder
            .add_source(environment)
            .set_override_option("image", overrides.image.clone())
            .and_then(|b| b.set_override_option("username", overrides.username.clone()))
            .and_then(|b| b.set_override_option("password", overrides.password.clone()))
            .and_then(|b| b.set_override_option("files", overrides.files.clone()))
            .and_then(|b| {
                b.set_override_option(
                    "output",
                    overrides
                        .output
                        .as_ref()
                        .map(|path| path.to_string_lossy().to_string()),
                )
            })
            .and_then(|b| {
                b.set_override_option("concurrency", overrides.concurrency.map(|n| n as u64))
            })
            .and_then(|b| b.set_override_option("timeout", overrides.timeout))
            .map_err(config_error)?;

        if overrides.plain_http {
            builder = builder.set_override("plain_http", true).map_err(config_error)?;
        }

        let raw: RawConfig = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error)?;

        raw.validate(require_files)
    }
}

impl RawConfig {
    fn validate(self, require_files: bool) -> Result<BundleConfig> {
        let image = required(self.image, "image")?.parse::<RepositoryReference>()?;
        let username = required(self.username, "username")?;
        let password = required(self.password, "password")?;

        let files: Vec<PathBuf> = self
            .files
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect();
        if require_files && files.is_empty() {
            return Err(Error::Configuration("missing required value 'files'".to_string()));
        }

        if self.concurrency == 0 {
            return Err(Error::Configuration("concurrency must be at least 1".to_string()));
        }

        Ok(BundleConfig {
            image,
            credential: Credential::new(username, password),
            files,
            output: self.output,
            client: ClientOptions {
                plain_http: self.plain_http,
                timeout: self.timeout.map(Duration::from_secs),
                concurrency: self.concurrency,
            },
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Configuration(format!("missing required value '{}'", name)))
}

fn config_error(err: config::ConfigError) -> Error {
    Error::Configuration(err.to_string())
}
