//! Frame bridge demo: a jittery synthetic producer feeding a fixed-rate consumer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use framebridge::capture::frame::PLANES;
use framebridge::display::{
    RenderApi, TextureDesc, TextureId, TextureSizeCallback, TextureUpdate, VideoDesc, VideoKind,
};
use framebridge::pipeline::{DeferredSample, OutputSample};
use framebridge::utils::{chroma_dim, i420_size};
use framebridge::{BridgeError, Config, DemoConfig, FrameBridge, Handle, I420Frame, Pull, RendererRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("framebridge demo launching...");

    // Load configuration: optional TOML path as the first argument
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    let demo = config.demo.clone();
    info!(?config, "configuration loaded");

    let bridge = Arc::new(FrameBridge::new(&config.bridge, &config.stats));
    let registry = Arc::new(RendererRegistry::new(&config.renderer));
    let renderer = registry.create(1)?;
    registry.enable_video(renderer, VideoKind::I420, &plane_textures(demo.width, demo.height))?;
    let on_resize: TextureSizeCallback = Box::new(|width, height, handle| {
        warn!(%handle, width, height, "texture size changed");
    });
    registry.set_texture_size_callback(Some(on_resize));

    let (present_tx, present_rx) = flume::bounded::<OutputSample>(4);

    let producer = tokio::spawn(produce(Arc::clone(&bridge), demo.clone()));
    let consumer = tokio::spawn(consume(Arc::clone(&bridge), present_tx, demo.consumer_fps));
    let presenter = tokio::spawn(present(
        Arc::clone(&bridge),
        Arc::clone(&registry),
        renderer,
        present_rx,
        demo.skip_processed_every,
    ));
    let reporter = tokio::spawn(report(Arc::clone(&bridge), demo.report_interval_secs));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(demo.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    bridge.shutdown();
    reporter.abort();
    for task in [producer, consumer, presenter] {
        if let Err(e) = task.await {
            error!("demo task failed: {}", e);
        }
    }
    registry.shutdown();

    let counts = bridge.counts();
    info!(
        load = counts.load,
        present = counts.present,
        skip = counts.skip,
        late = counts.late,
        superseded = counts.superseded,
        dropped = counts.dropped_frames(),
        "framebridge demo shutting down"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framebridge=debug"));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

/// One R8 texture per I420 plane.
fn plane_textures(width: u32, height: u32) -> [TextureDesc; PLANES] {
    let (cw, ch) = (chroma_dim(width), chroma_dim(height));
    [
        TextureDesc { texture: TextureId(0), width, height },
        TextureDesc { texture: TextureId(1), width: cw, height: ch },
        TextureDesc { texture: TextureId(2), width: cw, height: ch },
    ]
}

/// Push a moving gradient at `producer_fps`, each frame delayed by a
/// deterministic jitter. Every other frame carries padded strides.
async fn produce(bridge: Arc<FrameBridge>, demo: DemoConfig) {
    let (width, height) = (demo.width, demo.height);
    let (cw, ch) = (chroma_dim(width) as usize, chroma_dim(height) as usize);
    let pad = 32;
    let strides = [width as usize + pad, cw + pad, cw + pad];
    let padded_len = strides[0] * height as usize + 2 * strides[1] * ch;

    let mut tight = vec![0u8; i420_size(width, height)];
    let mut padded = vec![0u8; padded_len];
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / demo.producer_fps));
    let mut seq: u64 = 0;

    loop {
        interval.tick().await;
        if demo.jitter_ms > 0 {
            let jitter = seq.wrapping_mul(2_654_435_761) % (demo.jitter_ms + 1);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let shade = seq as u8;
        let frame = if seq % 2 == 0 {
            tight.iter_mut().enumerate().for_each(|(i, b)| *b = shade.wrapping_add(i as u8));
            I420Frame::tight(width, height, &tight)
        } else {
            padded.iter_mut().enumerate().for_each(|(i, b)| *b = shade.wrapping_add(i as u8));
            I420Frame::packed(width, height, &padded, strides)
        };

        match bridge.on_frame(&frame) {
            Ok(outcome) => debug!(seq, ?outcome, "frame pushed"),
            Err(BridgeError::Closed) => break,
            Err(e) => {
                error!("producer error: {}", e);
                break;
            }
        }
        seq += 1;
    }
    debug!(frames = seq, "producer stopped");
}

/// Pull on a fixed tick. Deferred pulls are awaited off the tick.
async fn consume(bridge: Arc<FrameBridge>, present_tx: flume::Sender<OutputSample>, fps: f64) {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match bridge.pull() {
            Ok(Pull::Sample(sample)) => {
                if present_tx.send_async(sample).await.is_err() {
                    break;
                }
            }
            Ok(Pull::Deferred(deferred)) => {
                tokio::spawn(await_deferred(deferred, present_tx.clone()));
            }
            Err(BridgeError::Closed) => break,
            Err(e) => {
                error!("consumer error: {}", e);
                break;
            }
        }
    }
    debug!("consumer stopped");
}

async fn await_deferred(deferred: DeferredSample, present_tx: flume::Sender<OutputSample>) {
    match deferred.wait().await {
        Ok(sample) => {
            let _ = present_tx.send_async(sample).await;
        }
        Err(reason) => debug!(?reason, "deferred pull cancelled"),
    }
}

/// Hand samples to the renderer and signal completion. Every
/// `skip_every`-th completion is withheld to exercise recovery by draining.
async fn present(
    bridge: Arc<FrameBridge>,
    registry: Arc<RendererRegistry>,
    renderer: Handle,
    samples: flume::Receiver<OutputSample>,
    skip_every: u64,
) {
    let mut textures = CpuTextures::default();
    let mut presented: u64 = 0;

    while let Ok(sample) = samples.recv_async().await {
        if let Err(e) = registry.on_i420_frame(renderer, &sample.as_frame()) {
            warn!("renderer rejected frame: {}", e);
        }
        registry.do_video_update(&mut textures);

        presented += 1;
        let id = sample.id();
        drop(sample);
        if skip_every > 0 && presented % skip_every == 0 {
            continue;
        }
        bridge.on_processed(id);
    }
    debug!(presented, uploads = textures.uploads, "presenter stopped");
}

/// Periodically log the rolling rates.
async fn report(bridge: Arc<FrameBridge>, every_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        info!(
            load_fps = bridge.load_rate(),
            present_fps = bridge.present_rate(),
            skip_fps = bridge.skip_rate(),
            late_fps = bridge.late_rate(),
            in_use = bridge.samples_in_use(),
            "frame rates"
        );
    }
}

/// Texture backend that maps every texture onto one scratch allocation.
#[derive(Default)]
struct CpuTextures {
    scratch: Vec<u8>,
    uploads: u64,
}

impl RenderApi for CpuTextures {
    fn begin_modify_texture(&mut self, desc: &VideoDesc) -> Option<TextureUpdate<'_>> {
        let row_pitch = desc.width as usize * desc.format.bytes_per_pixel();
        self.scratch.resize(row_pitch * desc.height as usize, 0);
        Some(TextureUpdate {
            data: &mut self.scratch,
            row_pitch,
        })
    }

    fn end_modify_texture(&mut self, _texture: TextureId, _desc: &VideoDesc) {
        self.uploads += 1;
    }
}
