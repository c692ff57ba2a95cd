use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use folio_contracts::Manifest;
use folio_engine::orchestrator::{DEFAULT_CHARACTER_AGE, DEFAULT_CHARACTER_NAME};
use folio_engine::service::{DEFAULT_REPLICATE_API_BASE, DEFAULT_REPLICATE_MODEL};
use folio_engine::store::DEFAULT_REGION;
use folio_engine::uploader::{DEFAULT_NAMESPACE, DEFAULT_UPLOAD_WORKERS};
use folio_engine::{
    PipelineOptions, PollPolicy, ReplicateConfig, S3Config, Substitutions, UploadOptions,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_SUBMIT_DELAY, REDACTED,
};

#[derive(Debug, Clone, Default, Args)]
pub(crate) struct ManifestArgs {
    /// Storybook manifest file (JSON array of books).
    #[arg(long, conflicts_with = "manifest_json")]
    pub manifest: Option<PathBuf>,
    /// Storybook manifest given inline.
    #[arg(long)]
    pub manifest_json: Option<String>,
    #[arg(long, default_value = DEFAULT_CHARACTER_NAME)]
    pub character_name: String,
    #[arg(long, default_value = DEFAULT_CHARACTER_AGE)]
    pub character_age: String,
}

impl ManifestArgs {
    pub(crate) fn load(&self) -> Result<Manifest> {
        match (&self.manifest, &self.manifest_json) {
            (Some(path), _) => Manifest::load(path),
            (None, Some(raw)) => Manifest::parse(raw).context("invalid --manifest-json"),
            (None, None) => bail!("no manifest given (pass --manifest <file> or --manifest-json <text>)"),
        }
    }

    pub(crate) fn substitutions(&self) -> Substitutions {
        Substitutions::new(self.character_name.trim(), self.character_age.trim())
    }
}

/// Credentials and endpoints. Every flag falls back to its environment variable.
#[derive(Clone, Default, Args)]
pub(crate) struct ServiceArgs {
    /// Replicate API token [env: REPLICATE_API_TOKEN, REPLICATE_API_KEY]
    #[arg(long)]
    pub replicate_token: Option<String>,
    /// [env: REPLICATE_API_BASE]
    #[arg(long)]
    pub replicate_api_base: Option<String>,
    /// [env: REPLICATE_MODEL]
    #[arg(long)]
    pub replicate_model: Option<String>,
    /// S3-compatible endpoint URL [env: R2_ENDPOINT]
    #[arg(long)]
    pub storage_endpoint: Option<String>,
    /// Cloudflare account id, used when no endpoint is given [env: R2_ACCOUNT_ID]
    #[arg(long)]
    pub r2_account_id: Option<String>,
    /// [env: R2_ACCESS_KEY_ID]
    #[arg(long)]
    pub access_key_id: Option<String>,
    /// [env: R2_SECRET_ACCESS_KEY]
    #[arg(long)]
    pub secret_access_key: Option<String>,
    /// [env: AWS_REGION]
    #[arg(long)]
    pub region: Option<String>,
    /// [env: R2_BUCKET_NAME]
    #[arg(long)]
    pub bucket: Option<String>,
    /// Base of the public image URLs [env: R2_PUBLIC_DOMAIN]
    #[arg(long)]
    pub public_domain: Option<String>,
    /// Leading blob key segment [env: R2_PROJECT_FOLDER]
    #[arg(long)]
    pub namespace: Option<String>,
}

impl fmt::Debug for ServiceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |value: &Option<String>| value.as_ref().map(|_| REDACTED);
        f.debug_struct("ServiceArgs")
            .field("replicate_token", &hidden(&self.replicate_token))
            .field("replicate_api_base", &self.replicate_api_base)
            .field("replicate_model", &self.replicate_model)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("r2_account_id", &self.r2_account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &hidden(&self.secret_access_key))
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("public_domain", &self.public_domain)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[derive(Debug, Clone, Args)]
pub(crate) struct TuningArgs {
    #[arg(long, default_value_t = DEFAULT_SUBMIT_DELAY.as_millis() as u64)]
    pub submit_delay_ms: u64,
    #[arg(long, default_value_t = 3)]
    pub poll_interval_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub poll_max_interval_secs: u64,
    #[arg(long, default_value_t = 600)]
    pub poll_timeout_secs: u64,
    #[arg(long, default_value_t = DEFAULT_UPLOAD_WORKERS)]
    pub upload_workers: usize,
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT.as_secs())]
    pub http_timeout_secs: u64,
}

impl Default for TuningArgs {
    fn default() -> Self {
        Self {
            submit_delay_ms: DEFAULT_SUBMIT_DELAY.as_millis() as u64,
            poll_interval_secs: 3,
            poll_max_interval_secs: 30,
            poll_timeout_secs: 600,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RunConfig {
    pub replicate: ReplicateConfig,
    pub storage: S3Config,
    pub pipeline: PipelineOptions,
    pub http_timeout: Duration,
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn pick(flag: &Option<String>, env: &dyn Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    flag.as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| keys.iter().find_map(|key| env(key)))
}

pub(crate) fn resolve_namespace(
    args: &ServiceArgs,
    env: &dyn Fn(&str) -> Option<String>,
) -> String {
    pick(&args.namespace, env, &["R2_PROJECT_FOLDER"])
        .map(|value| value.trim_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// Resolves flags, then environment, then defaults. Fails naming every
/// missing credential before any remote call is made.
pub(crate) fn resolve_run_config(
    args: &ServiceArgs,
    tuning: &TuningArgs,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<RunConfig> {
    let mut missing = Vec::new();
    let mut require = |value: Option<String>, name: &str| {
        if value.is_none() {
            missing.push(name.to_string());
        }
        value.unwrap_or_default()
    };

    let token = require(
        pick(&args.replicate_token, env, &["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"]),
        "REPLICATE_API_TOKEN",
    );
    let endpoint = require(
        pick(&args.storage_endpoint, env, &["R2_ENDPOINT"]).or_else(|| {
            pick(&args.r2_account_id, env, &["R2_ACCOUNT_ID"])
                .map(|account| S3Config::r2_endpoint(&account))
        }),
        "R2_ENDPOINT or R2_ACCOUNT_ID",
    );
    let access_key = require(
        pick(&args.access_key_id, env, &["R2_ACCESS_KEY_ID"]),
        "R2_ACCESS_KEY_ID",
    );
    let secret_key = require(
        pick(&args.secret_access_key, env, &["R2_SECRET_ACCESS_KEY"]),
        "R2_SECRET_ACCESS_KEY",
    );
    let bucket = require(pick(&args.bucket, env, &["R2_BUCKET_NAME"]), "R2_BUCKET_NAME");
    let public_base_url = require(
        pick(&args.public_domain, env, &["R2_PUBLIC_DOMAIN"]),
        "R2_PUBLIC_DOMAIN",
    );
    if !missing.is_empty() {
        bail!("missing configuration: {}", missing.join(", "));
    }
    if tuning.upload_workers == 0 {
        bail!("--upload-workers must be at least 1");
    }
    if tuning.http_timeout_secs == 0 {
        bail!("--http-timeout-secs must be at least 1");
    }

    let mut replicate = ReplicateConfig::new(token);
    replicate.api_base = pick(&args.replicate_api_base, env, &["REPLICATE_API_BASE"])
        .unwrap_or_else(|| DEFAULT_REPLICATE_API_BASE.to_string());
    replicate.model = pick(&args.replicate_model, env, &["REPLICATE_MODEL"])
        .unwrap_or_else(|| DEFAULT_REPLICATE_MODEL.to_string());

    let storage = S3Config {
        endpoint,
        access_key,
        secret_key,
        region: pick(&args.region, env, &["AWS_REGION"]).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        bucket,
        public_base_url,
    };

    let pipeline = PipelineOptions {
        submit_delay: Duration::from_millis(tuning.submit_delay_ms),
        poll: PollPolicy {
            initial_interval: Duration::from_secs(tuning.poll_interval_secs),
            max_interval: Duration::from_secs(tuning.poll_max_interval_secs),
            timeout: Duration::from_secs(tuning.poll_timeout_secs),
            ..PollPolicy::default()
        },
        upload: UploadOptions {
            namespace: resolve_namespace(args, env),
            workers: tuning.upload_workers,
        },
    };

    Ok(RunConfig {
        replicate,
        storage,
        pipeline,
        http_timeout: Duration::from_secs(tuning.http_timeout_secs),
    })
}
