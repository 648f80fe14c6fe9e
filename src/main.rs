use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::info;

use livescape::{
    AppConfig,
    core::audio::{AudioPlaybackQueue, ClockedNullSink, PlaybackSink},
    core::camera::{CameraConfig, CameraControlSurface},
    core::runtime::{LiveSession, LiveSessionConfig, SessionEvent, SessionMedia},
    core::session::InboundEnvelope,
    core::vision::{StillImageSource, VisionClient, VisionSampler, encode_jpeg},
    proxy,
};

/// livescape - realtime agent sessions and the edge proxy in front of them
#[derive(Parser, Debug)]
#[command(name = "livescape")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `proxy`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the authenticating edge proxy
    Proxy,

    /// Run an agent session against LIVESCAPE_ENDPOINT
    Session {
        /// Text sent as the first user turn
        #[arg(short = 'p', long = "prompt")]
        prompt: Option<String>,
    },

    /// Describe an image through the proxy's /vision endpoint
    Describe {
        /// Image file to describe
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Prompt sent with the image
        #[arg(short = 'p', long = "prompt")]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must be installed before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Proxy) {
        Commands::Proxy => run_proxy(config).await,
        Commands::Session { prompt } => run_session(config, prompt).await,
        Commands::Describe { image, prompt } => run_describe(config, image, prompt).await,
    }
}

async fn run_proxy(config: AppConfig) -> anyhow::Result<()> {
    config
        .validate_proxy()
        .map_err(|e| anyhow!(e.to_string()))?;

    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    println!("Server listening on http://{}", socket_addr);

    proxy::serve(config, listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;
    Ok(())
}

async fn run_session(config: AppConfig, prompt: Option<String>) -> anyhow::Result<()> {
    let session = config.session_config().map_err(|e| anyhow!(e.to_string()))?;
    info!(endpoint = %session.endpoint.redacted(), model = %session.model, "Starting session");

    let camera = Arc::new(Mutex::new(CameraControlSurface::new(CameraConfig::default())));

    let vision = match &config.panorama_path {
        Some(path) => {
            let source = StillImageSource::open(path)
                .map_err(|e| anyhow!("Failed to load {}: {}", path.display(), e))?;
            Some(VisionSampler::new(Box::new(source), config.vision_config()))
        }
        None => None,
    };

    let media = SessionMedia {
        capture: open_capture(&config).await,
        playback: AudioPlaybackQueue::new(open_playback_sink().await),
        vision,
    };

    let live_config = LiveSessionConfig {
        session,
        ..Default::default()
    };
    let (mut live, mut events) = LiveSession::start(live_config, camera, media)
        .await
        .map_err(|e| anyhow!("Failed to connect: {}", e))?;
    info!(session_id = ?live.session_id(), "Session connected");

    if let Some(prompt) = prompt {
        live.send_text(prompt, true);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if report(event) {
                    break;
                }
            }
        }
    }

    live.disconnect().await;
    Ok(())
}

/// Print one session event. Returns true once the session has ended.
fn report(event: SessionEvent) -> bool {
    match event {
        SessionEvent::Inbound(InboundEnvelope::TextFragment(text)) => println!("agent: {text}"),
        SessionEvent::Inbound(InboundEnvelope::Transcription { source, text }) => {
            println!("{source:?} transcript: {text}")
        }
        SessionEvent::Inbound(InboundEnvelope::GoAway { time_left }) => {
            println!("server going away in {time_left:?}")
        }
        SessionEvent::Inbound(other) => tracing::debug!(event = ?other, "Session event"),
        SessionEvent::ToolResults(results) => {
            for result in results {
                println!("tool {} -> {}", result.name, result.response);
            }
        }
        SessionEvent::Closed { code, reason } => {
            println!("session closed ({code:?}): {reason}");
            return true;
        }
    }
    false
}

async fn run_describe(
    config: AppConfig,
    image: PathBuf,
    prompt: Option<String>,
) -> anyhow::Result<()> {
    let endpoint = config
        .session_endpoint
        .as_deref()
        .ok_or_else(|| anyhow!("LIVESCAPE_ENDPOINT must point at the proxy"))?;
    let token = endpoint_token(endpoint);
    let client = VisionClient::new(endpoint, token)?;

    let picture = image::open(&image)
        .map_err(|e| anyhow!("Failed to load {}: {}", image.display(), e))?;
    let frame = encode_jpeg(
        &picture,
        config.vision_max_dimension,
        config.vision_jpeg_quality,
    )?;

    let text = client.describe(&frame, prompt.as_deref()).await?;
    println!("{text}");
    Ok(())
}

/// `token` query parameter of a proxy URL.
fn endpoint_token(endpoint: &str) -> Option<String> {
    let url = url::Url::parse(endpoint).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

#[cfg(feature = "device-audio")]
async fn open_capture(config: &AppConfig) -> Option<livescape::core::audio::AudioCaptureStream> {
    match livescape::core::audio::open_default_microphone(config.capture_config()).await {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::error!(devices = ?e.available_devices(), "Microphone unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "device-audio"))]
async fn open_capture(_config: &AppConfig) -> Option<livescape::core::audio::AudioCaptureStream> {
    info!("Built without device-audio, running without a microphone");
    None
}

#[cfg(feature = "device-audio")]
async fn open_playback_sink() -> Box<dyn PlaybackSink> {
    match livescape::core::audio::DevicePlaybackSink::open_default().await {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!("Speaker unavailable, discarding agent audio: {}", e);
            Box::new(ClockedNullSink::new())
        }
    }
}

#[cfg(not(feature = "device-audio"))]
async fn open_playback_sink() -> Box<dyn PlaybackSink> {
    Box::new(ClockedNullSink::new())
}
