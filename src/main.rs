//! camview - MJPEG IP-camera stream viewer
//!
//! Connects to a camera serving Motion-JPEG over HTTP, runs the decode
//! and render pipeline against an in-memory surface, and optionally
//! records raw frames to disk.

use anyhow::Result;
use camview_core::{DisplayMode, StreamConfig, ViewerConfig};
use camview_render::{BufferSurface, DirRecorder, Renderer};
use camview_stream::StreamSession;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// camview - watch an MJPEG IP-camera stream
#[derive(Parser, Debug)]
#[command(name = "camview")]
#[command(version, about, long_about = None)]
struct Args {
    /// MJPEG stream URL, e.g. http://192.168.1.10/video.mjpg
    url: String,

    /// HTTP Basic username
    #[arg(short, long)]
    username: Option<String>,

    /// HTTP Basic password
    #[arg(short, long)]
    password: Option<String>,

    /// Connect/read timeout in seconds
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// Surface width in pixels
    #[arg(short = 'W', long, default_value = "1280")]
    width: u32,

    /// Surface height in pixels
    #[arg(short = 'H', long, default_value = "720")]
    height: u32,

    /// Frame fitting policy: fullscreen or best-fit
    #[arg(short = 'm', long, default_value = "best-fit")]
    display_mode: DisplayMode,

    /// Overlay the measured frame rate
    #[arg(long)]
    show_fps: bool,

    /// Mirror frames left-right
    #[arg(long)]
    flip_horizontal: bool,

    /// Mirror frames top-bottom
    #[arg(long)]
    flip_vertical: bool,

    /// Rotate frames by the given degrees
    #[arg(short, long, default_value = "0")]
    rotate: f32,

    /// Record raw JPEG frames into this directory
    #[arg(long)]
    record_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("camview={}", log_level))),
        )
        .init();

    let mut stream_config = StreamConfig::new(&args.url).with_timeout_secs(args.timeout);
    if let (Some(user), Some(pass)) = (&args.username, &args.password) {
        stream_config = stream_config.with_credentials(user, pass);
    }
    let viewer_config = ViewerConfig {
        display_mode: args.display_mode,
        show_fps: args.show_fps,
        flip_horizontal: args.flip_horizontal,
        flip_vertical: args.flip_vertical,
        rotate_degrees: args.rotate,
    };

    info!("connecting to {}", args.url);
    let subscription =
        tokio::task::spawn_blocking(move || StreamSession::open(stream_config)).await??;
    let mut state = subscription.state_watch();

    let renderer = Renderer::new(BufferSurface::new(args.width, args.height));
    renderer.apply_viewer_config(&viewer_config);
    if let Some(dir) = &args.record_dir {
        info!("recording frames to {}", dir);
        renderer.set_frame_sink(Arc::new(DirRecorder::new(dir)?));
    }

    // the hosting shell would drive these from platform surface events
    renderer.on_surface_created();
    renderer.on_surface_changed(args.width, args.height);
    renderer.set_source(subscription)?;

    info!("streaming; press ctrl-c to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                info!("session state: {:?}", current);
                if current.is_terminal() {
                    break;
                }
            }
        }
    }

    renderer.on_surface_destroyed();
    renderer.stop_playback();
    Ok(())
}
