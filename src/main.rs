use clap::Parser;
use sgl_token_streamer::{
    config::{BackendConfig, ConfigError, ConfigResult, GenerationConfig, MetricsConfig, ServerConfig},
    server,
};

#[derive(Parser, Debug)]
#[command(name = "sgl-token-streamer")]
#[command(about = "Streaming chat front end with incremental detokenization")]
#[command(long_about = r#"
Streaming chat front end with incremental detokenization

Renders a conversation with the tokenizer's chat template, drives token
generation and streams correctly spaced text deltas back as server-sent events.

Examples:
  # Loopback generation, useful to check tokenizer and template wiring
  sgl-token-streamer --tokenizer-path /models/mistral/tokenizer.json --backend local

  # Stream from a Triton-style inference server
  sgl-token-streamer --tokenizer-path /models/mistral/tokenizer.json \
    --backend remote --remote-url http://localhost:8001 --remote-model mistral-cpu
"#)]
struct CliArgs {
    /// Host address to bind the server
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path to tokenizer.json
    #[arg(long)]
    tokenizer_path: String,

    /// Chat template file (.jinja or .json); defaults to the tokenizer's own
    #[arg(long)]
    chat_template: Option<String>,

    /// Model name served under /v2/models/{model}
    #[arg(long, default_value = "mistral-streaming")]
    model_name: String,

    /// Where token ids come from
    #[arg(long, default_value = "local", value_parser = ["local", "remote"])]
    backend: String,

    /// Hand-off channel capacity for the local backend
    #[arg(long, default_value_t = 64)]
    channel_capacity: usize,

    /// Wall-clock limit in seconds for one local generation
    #[arg(long, default_value_t = 300)]
    max_generation_secs: u64,

    /// Inference server base URL for the remote backend
    #[arg(long)]
    remote_url: Option<String>,

    /// Model name on the inference server
    #[arg(long)]
    remote_model: Option<String>,

    /// max_tokens used when a request does not set one
    #[arg(long, default_value_t = 512)]
    default_max_tokens: u32,

    /// Encode the rendered prompt without BOS/EOS
    #[arg(long, default_value_t = false)]
    no_special_tokens: bool,

    /// Keep the leading space of the first streamed fragment
    #[arg(long, default_value_t = false)]
    keep_first_leading_space: bool,

    /// Maximum payload size in bytes
    #[arg(long, default_value_t = 4194304)] // 4MB
    max_payload_size: usize,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 600)]
    request_timeout_secs: u64,

    /// Directory to store log files
    #[arg(long)]
    log_dir: Option<String>,

    /// Set the logging level
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Port to expose Prometheus metrics on; disabled when unset
    #[arg(long)]
    prometheus_port: Option<u16>,

    /// Host address to bind the Prometheus metrics server
    #[arg(long, default_value = "127.0.0.1")]
    prometheus_host: String,
}

impl CliArgs {
    fn backend_config(&self) -> ConfigResult<BackendConfig> {
        match self.backend.as_str() {
            "remote" => Ok(BackendConfig::Remote {
                url: self
                    .remote_url
                    .clone()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        field: "remote_url".to_string(),
                    })?,
                model_name: self
                    .remote_model
                    .clone()
                    .unwrap_or_else(|| self.model_name.clone()),
            }),
            _ => Ok(BackendConfig::Local {
                channel_capacity: self.channel_capacity,
                max_generation_secs: self.max_generation_secs,
            }),
        }
    }

    fn to_server_config(&self) -> ConfigResult<ServerConfig> {
        Ok(ServerConfig {
            host: self.host.clone(),
            port: self.port,
            tokenizer_path: self.tokenizer_path.clone(),
            chat_template_path: self.chat_template.clone(),
            model_name: self.model_name.clone(),
            backend: self.backend_config()?,
            generation: GenerationConfig {
                default_max_tokens: self.default_max_tokens,
                add_special_tokens: !self.no_special_tokens,
                strip_first_leading_space: !self.keep_first_leading_space,
            },
            max_payload_size: self.max_payload_size,
            request_timeout_secs: self.request_timeout_secs,
            log_dir: self.log_dir.clone(),
            log_level: Some(self.log_level.clone()),
            log_json: self.log_json,
            metrics: self.prometheus_port.map(|port| MetricsConfig {
                port,
                host: self.prometheus_host.clone(),
            }),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();

    println!("sgl-token-streamer starting...");
    println!("Host: {}:{}", cli_args.host, cli_args.port);
    println!("Backend: {}", cli_args.backend);

    let server_config = cli_args.to_server_config()?;
    server_config.validate()?;

    actix_web::rt::System::new().block_on(async move { server::startup(server_config).await })?;

    Ok(())
}
