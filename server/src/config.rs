use crate::telemetry::{LogFormat, LogSettings};
use clap::Parser;
use joblib::command::CommandSettings;
use joblib::storage::S3Settings;
use joblib::PipelineSettings;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("cannot determine the project root: {0}")]
    ProjectRoot(#[source] std::io::Error),
    #[error("cannot resolve interpreter {name:?}: {source}")]
    Interpreter {
        name: PathBuf,
        source: which::Error,
    },
}

/// HTTP gateway in front of the video preprocessing and generation scripts
///
/// Every option can also be given through the environment variable named next to it.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct GatewayConfig {
    /// Address to listen on
    #[clap(long, env = "GATEWAY_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// Bucket receiving all uploaded results
    #[clap(long, env = "S3_BUCKET")]
    pub s3_bucket: String,
    /// Key prefix under which results are published
    #[clap(long, env = "S3_PREFIX_PATH")]
    pub s3_prefix_path: String,
    #[clap(long, env = "S3_AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub s3_access_key_id: String,
    #[clap(long, env = "S3_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub s3_secret_access_key: String,
    #[clap(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,
    /// Custom endpoint of an S3-compatible store, e.g. http://minio:9000
    #[clap(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Checkpoint directory passed to the preprocessing script
    #[clap(long, env = "PREPROCESS_CKPT_PATH")]
    pub preprocess_ckpt_path: String,
    /// Checkpoint directory passed to the generation script
    #[clap(long, env = "INFERENCE_CKPT_PATH")]
    pub inference_ckpt_path: String,

    /// Root of the compute project [default: current directory]
    #[clap(long, env = "PROJECT_ROOT")]
    pub project_root: Option<PathBuf>,
    /// Interpreter running the scripts; resolved against PATH at startup
    #[clap(long, env = "PYTHON_BIN", default_value = "python3")]
    pub python_bin: PathBuf,
    #[clap(
        long,
        env = "PREPROCESS_SCRIPT",
        default_value = "wan/modules/animate/preprocess/preprocess_data.py"
    )]
    pub preprocess_script: PathBuf,
    #[clap(long, env = "GENERATE_SCRIPT", default_value = "generate.py")]
    pub generate_script: PathBuf,
    /// Module search path to extend for the scripts
    #[clap(long, env = "PYTHONPATH", hide = true)]
    pub inherited_pythonpath: Option<String>,

    /// Parent directory of per-job workspaces [default: system temp dir]
    #[clap(long, env = "WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,
    /// How long a request waits for a running job to finish before it is rejected
    #[clap(long, env = "GATE_TIMEOUT_MS", default_value = "1000")]
    pub gate_timeout_ms: u64,
    /// Scripts still running after this long are killed
    #[clap(long, env = "PROCESS_TIMEOUT_SECS", default_value = "14400")]
    pub process_timeout_secs: u64,
    /// Lifetime of the published download URLs
    #[clap(long, env = "PRESIGN_EXPIRY_SECS", default_value = "3600")]
    pub presign_expiry_secs: u64,
    /// Script output lines buffered before the readers wait
    #[clap(long, env = "OUTPUT_LINE_CAPACITY", default_value = "1024")]
    pub output_line_capacity: usize,

    #[clap(long, env = "LOG_FORMAT", arg_enum, default_value = "pretty")]
    pub log_format: LogFormat,
    /// Also append logs to this file
    #[clap(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("S3_BUCKET", &self.s3_bucket),
            ("S3_PREFIX_PATH", &self.s3_prefix_path),
            ("S3_AWS_ACCESS_KEY_ID", &self.s3_access_key_id),
            ("S3_AWS_SECRET_ACCESS_KEY", &self.s3_secret_access_key),
            ("PREPROCESS_CKPT_PATH", &self.preprocess_ckpt_path),
            ("INFERENCE_CKPT_PATH", &self.inference_ckpt_path),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }

        let positive = [
            ("GATE_TIMEOUT_MS", self.gate_timeout_ms),
            ("PROCESS_TIMEOUT_SECS", self.process_timeout_secs),
            ("PRESIGN_EXPIRY_SECS", self.presign_expiry_secs),
            ("OUTPUT_LINE_CAPACITY", self.output_line_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            region: self.s3_region.clone(),
            endpoint: self.s3_endpoint.clone().filter(|e| !e.is_empty()),
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::ProjectRoot)?;
        let project_root = self.project_root.clone().unwrap_or_else(|| cwd.clone());
        let python = resolve_interpreter(&self.python_bin, &cwd)?;
        let workspace_root = self
            .workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        Ok(PipelineSettings {
            command: CommandSettings {
                python,
                project_root,
                inherited_pythonpath: self.inherited_pythonpath.clone(),
                preprocess_script: self.preprocess_script.clone(),
                generate_script: self.generate_script.clone(),
                preprocess_ckpt_path: self.preprocess_ckpt_path.clone(),
                inference_ckpt_path: self.inference_ckpt_path.clone(),
            },
            output_bucket: self.s3_bucket.clone(),
            upload_prefix: self.s3_prefix_path.clone(),
            workspace_root,
            gate_timeout: Duration::from_millis(self.gate_timeout_ms),
            process_timeout: Duration::from_secs(self.process_timeout_secs),
            url_expiry: Duration::from_secs(self.presign_expiry_secs),
            line_capacity: self.output_line_capacity,
        })
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            format: self.log_format,
            file: self.log_file.clone(),
        }
    }
}

/// Absolute path of `name`, looked up on PATH unless it already names a file. Symlinks are kept,
/// so a virtualenv interpreter stays the virtualenv's.
fn resolve_interpreter(name: &Path, cwd: &Path) -> Result<PathBuf, ConfigError> {
    let found = which::which(name).map_err(|source| ConfigError::Interpreter {
        name: name.to_path_buf(),
        source,
    })?;
    Ok(if found.is_absolute() {
        found
    } else {
        cwd.join(found)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 15] = [
        "gateway-server",
        "--python-bin",
        "sh",
        "--s3-bucket",
        "outputs",
        "--s3-prefix-path",
        "runs/",
        "--s3-access-key-id",
        "key",
        "--s3-secret-access-key",
        "secret",
        "--preprocess-ckpt-path",
        "/ckpt/process",
        "--inference-ckpt-path",
        "/ckpt/animate",
    ];

    #[test]
    fn defaults_fill_the_pipeline_settings() {
        let config = GatewayConfig::try_parse_from(REQUIRED).unwrap();
        config.validate().unwrap();
        assert_eq!(config.s3_region, "us-east-1");

        let settings = config.pipeline_settings().unwrap();
        assert_eq!(settings.output_bucket, "outputs");
        assert_eq!(settings.gate_timeout, Duration::from_secs(1));
        assert_eq!(settings.process_timeout, Duration::from_secs(4 * 60 * 60));
        assert_eq!(settings.url_expiry, Duration::from_secs(3600));
        assert_eq!(settings.line_capacity, 1024);
        assert_eq!(
            settings.command.preprocess_script,
            PathBuf::from("wan/modules/animate/preprocess/preprocess_data.py")
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut args = REQUIRED.to_vec();
        args.extend([
            "--s3-endpoint",
            "http://minio:9000",
            "--project-root",
            "/srv/wan",
            "--process-timeout-secs",
            "60",
            "--log-format",
            "json",
        ]);
        let config = GatewayConfig::try_parse_from(args).unwrap();

        assert_eq!(
            config.s3_settings().endpoint.as_deref(),
            Some("http://minio:9000")
        );
        let settings = config.pipeline_settings().unwrap();
        assert_eq!(settings.command.project_root, PathBuf::from("/srv/wan"));
        assert_eq!(settings.process_timeout, Duration::from_secs(60));
        assert_eq!(config.log_settings().format, LogFormat::Json);
    }

    #[test]
    fn blank_required_value_is_rejected() {
        let mut args = REQUIRED.to_vec();
        args[4] = " ";
        let config = GatewayConfig::try_parse_from(args).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Empty("S3_BUCKET"))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--output-line-capacity", "0"]);
        let config = GatewayConfig::try_parse_from(args).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("OUTPUT_LINE_CAPACITY"))
        ));
    }

    #[test]
    fn interpreter_is_pinned_to_an_absolute_path() {
        let config = GatewayConfig::try_parse_from(REQUIRED).unwrap();
        let python = config.pipeline_settings().unwrap().command.python;
        assert!(python.is_absolute(), "{}", python.display());
        assert_eq!(python.file_name().unwrap(), "sh");
    }

    #[test]
    fn unknown_interpreter_is_rejected() {
        let mut args = REQUIRED.to_vec();
        args[2] = "no-such-interpreter-on-path";
        let config = GatewayConfig::try_parse_from(args).unwrap();
        assert!(matches!(
            config.pipeline_settings(),
            Err(ConfigError::Interpreter { .. })
        ));
    }
}
