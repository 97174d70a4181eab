//! video_augment - stream a camera, file or RTSP source through an augmentation
//! and optionally ask a remote vision-language service about one frame.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use video_augment::config::CONFIG_ENV;
use video_augment::ui::{Ui, UiMode};
use video_augment::{
    AppConfig, AugmentationOp, QueryDispatcher, SourceInputs, SourceSelection, StartRequest,
    StreamController,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (camera_address, llava_server_url, capture, stream).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
    /// Video input: webcam, file or rtsp.
    #[arg(long, default_value = "webcam")]
    source: SourceSelection,
    /// Video file to play when --source file.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Stream URL when --source rtsp.
    #[arg(long)]
    rtsp_url: Option<String>,
    /// Augmentation: none, grayscale, text-overlay or remote-query.
    #[arg(long, default_value = "none")]
    op: AugmentationOp,
    /// Text burned into each frame for text-overlay.
    #[arg(long)]
    text: Option<String>,
    /// Prompt sent with one live frame when --op remote-query.
    #[arg(long)]
    query: Option<String>,
    /// Stop after displaying this many frames.
    #[arg(long)]
    max_frames: Option<usize>,
    /// Progress output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // clap already resolved the env var into --config.
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let ui = Ui::detect(args.ui);

    let controller = Arc::new(StreamController::new(&config));
    controller.select_operation(args.op);
    {
        let controller = controller.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, stopping stream...");
            controller.stop();
        })
        .context("install Ctrl-C handler")?;
    }

    let stage = ui.stage("start stream");
    let request = StartRequest {
        selection: args.source,
        inputs: SourceInputs {
            file: args.file.clone(),
            rtsp_url: args.rtsp_url.clone(),
        },
        overlay_text: args.text.clone(),
    };
    let stream = match controller.start(request) {
        Ok(Some(stream)) => {
            drop(stage);
            stream
        }
        Ok(None) => {
            stage.fail();
            return Err(anyhow!("a stream is already running"));
        }
        Err(err) => {
            stage.fail();
            return Err(err.into());
        }
    };

    let dispatcher = QueryDispatcher::over_http(controller.clone(), &config.llava_server_url);
    let max_frames = args.max_frames.unwrap_or(usize::MAX);

    let (ui, dispatcher) = (&ui, &dispatcher);
    let query_outcome = std::thread::scope(|scope| {
        let query = match (args.query.as_deref(), args.op) {
            (Some(prompt), AugmentationOp::RemoteQuery) => Some(scope.spawn(move || {
                let _stage = ui.stage("remote query");
                dispatcher.submit_query(prompt)
            })),
            (Some(_), op) => {
                log::warn!("--query ignored: operation is {}", op);
                None
            }
            _ => None,
        };

        let mut counter = ui.frame_counter();
        for frame in stream.take(max_frames) {
            counter.record(&frame);
        }
        counter.finish();

        query.map(|handle| handle.join())
    });

    if let Some(summary) = controller.stop() {
        log::info!(
            "capture ended ({:?}): {} frames captured, {} dropped by backpressure",
            summary.exit,
            summary.captured,
            summary.dropped
        );
    }

    match query_outcome {
        Some(Ok(Ok(result))) => match result.reply {
            Some(reply) => println!("{}", reply),
            None => println!(
                "(frame {} sent, no reply in response)",
                result.frame.sequence()
            ),
        },
        Some(Ok(Err(err))) => return Err(anyhow!(err).context("remote query failed")),
        Some(Err(_)) => return Err(anyhow!("remote query thread panicked")),
        None => {}
    }
    Ok(())
}
