//! Headless avatar session runner
//!
//! Opens a streaming session, waits for the peer connection, has the avatar
//! speak a line, waits for the duration hint and tears the session down.
//!
//! # Usage
//!
//! ```bash
//! # Speak one line and exit
//! cargo run --bin avatar_session -- \
//!   --base-url https://avatar.example.com \
//!   --api-key $AVATAR_API_KEY \
//!   --avatar-id anna \
//!   --text "Hello, let's get started."
//!
//! # Load settings from a file; flags override file values
//! cargo run --bin avatar_session -- --config ./avatar.toml --quality high
//! ```

use anyhow::Context;
use clap::Parser;
use remotemedia_avatar_session::{
    AvatarSessionConfig, PixelSurface, Quality, RetryPolicy, SessionLifecycleController,
    SessionState, SpeechDispatcher,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RemoteMedia avatar session runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "AVATAR_CONFIG")]
    config: Option<PathBuf>,

    /// Avatar service base URL
    #[arg(long, env = "AVATAR_BASE_URL")]
    base_url: Option<String>,

    /// API key for the avatar service
    #[arg(long, env = "AVATAR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Avatar identifier
    #[arg(long, env = "AVATAR_ID")]
    avatar_id: Option<String>,

    /// Voice identifier
    #[arg(long, env = "AVATAR_VOICE_ID")]
    voice_id: Option<String>,

    /// Stream quality: low, medium, high
    #[arg(long, env = "AVATAR_QUALITY")]
    quality: Option<Quality>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "AVATAR_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Seconds to wait for the peer connection
    #[arg(long, env = "AVATAR_CONNECT_TIMEOUT")]
    connect_timeout_secs: Option<u64>,

    /// Text for the avatar to speak before closing
    #[arg(long, default_value = "Hello! This session is now closing.")]
    text: String,

    /// Retries for unavailable-service failures on start
    #[arg(long, default_value_t = 3, env = "AVATAR_START_RETRIES")]
    start_retries: u32,

    /// Emit JSON logs
    #[arg(long, default_value_t = false, env = "AVATAR_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn build_config(&self) -> anyhow::Result<AvatarSessionConfig> {
        let mut config = match &self.config {
            Some(path) => AvatarSessionConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AvatarSessionConfig::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api.api_key = api_key.clone();
        }
        if let Some(avatar_id) = &self.avatar_id {
            config.avatar.avatar_id = avatar_id.clone();
        }
        if self.voice_id.is_some() {
            config.avatar.voice_id = self.voice_id.clone();
        }
        if let Some(quality) = self.quality {
            config.avatar.quality = quality;
        }
        if !self.stun_servers.is_empty() {
            config.transport.stun_servers = self.stun_servers.clone();
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.transport.connect_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,remotemedia_avatar_session=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.build_config()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.api.base_url,
        avatar_id = %config.avatar.avatar_id,
        quality = ?config.avatar.quality,
        "Avatar session runner starting"
    );

    let connect_timeout = config.transport.connect_timeout();
    let (surface, shared) = PixelSurface::shared();
    let controller = SessionLifecycleController::from_config(config, shared)?;
    let speech = SpeechDispatcher::new(&controller);

    let policy = RetryPolicy {
        max_retries: args.start_retries,
        ..Default::default()
    };

    let run = async {
        let session = controller.start_with_retry(&policy).await?;
        info!("Session {} negotiated; waiting for media", session.label());
        controller
            .wait_for_state(SessionState::Connected, connect_timeout)
            .await?;

        let task = speech.conclude(&args.text).await?;
        info!(
            "Spoke {} chars over ~{} ms ({} frames rendered)",
            task.text.len(),
            task.duration_ms(),
            surface.lock().frames_drawn()
        );
        anyhow::Ok(())
    };

    tokio::select! {
        result = run => {
            if let Err(e) = &result {
                warn!("Session run failed: {:#}", e);
            }
            controller.stop().await?;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping session");
            controller.stop().await?;
            Ok(())
        }
    }
}
