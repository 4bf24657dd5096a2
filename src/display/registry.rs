//! Native renderers uploading remote video frames into backend textures.
//!
//! Lock order: the registry lock, then at most one renderer's lock. A thread
//! holding a renderer lock never takes the registry lock. Frame copies,
//! texture uploads and the size-change callback run with no lock held.
//!
//! Producer threads copy each frame into a recycled buffer, park it as the
//! renderer's next frame and mark the renderer dirty. The render thread drains
//! the dirty set once per tick and uploads the parked frames.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::capture::frame::PLANES;
use crate::capture::{FramePacket, I420Frame};
use crate::display::handle::{Handle, HandleTable};
use crate::display::texture::{RenderApi, TextureDesc, VideoDesc, VideoFormat, VideoKind};
use crate::error::{BridgeError, HandleError, Result};
use crate::pipeline::buffer_pool::BufferPool;
use crate::utils::{copy_rows, strided_extent};
use crate::RendererConfig;

/// Identity of the remote video source a renderer is attached to.
pub type SourceId = u64;

/// Called with the new frame size when it no longer matches the bound textures.
pub type TextureSizeCallback = Box<dyn Fn(u32, u32, Handle) + Send + Sync>;

#[derive(Default)]
struct RendererState {
    kind: VideoKind,
    textures: Vec<TextureDesc>,
    next_frame: Option<FramePacket>,
}

/// Per-source renderer state, guarded by its own instance lock.
pub struct NativeRenderer {
    source: SourceId,
    state: Mutex<RendererState>,
}

impl NativeRenderer {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            state: Mutex::new(RendererState::default()),
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn kind(&self) -> VideoKind {
        self.state.lock().kind
    }

    /// Whether a frame is parked for the next update pass.
    pub fn has_next_frame(&self) -> bool {
        self.state.lock().next_frame.is_some()
    }

    /// Clear textures and hand back any parked frame.
    fn reset(&self) -> Option<FramePacket> {
        let mut state = self.state.lock();
        state.kind = VideoKind::None;
        state.textures.clear();
        state.next_frame.take()
    }
}

struct Registry {
    renderers: HandleTable<Arc<NativeRenderer>>,
    dirty: BTreeSet<Handle>,
    frames: BufferPool,
    closed: bool,
}

impl Registry {
    fn recycle(&mut self, frame: FramePacket) {
        if !self.closed {
            self.frames.release(frame.into_buffer());
        }
    }
}

/// Owns every native renderer and the shared pool of frame buffers.
pub struct RendererRegistry {
    inner: Mutex<Registry>,
    size_callback: ArcSwapOption<TextureSizeCallback>,
    frame_id: AtomicU64,
}

impl RendererRegistry {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            inner: Mutex::new(Registry {
                renderers: HandleTable::new(),
                dirty: BTreeSet::new(),
                frames: BufferPool::with_max_free(config.max_free_frames),
                closed: false,
            }),
            size_callback: ArcSwapOption::empty(),
            frame_id: AtomicU64::new(0),
        }
    }

    fn renderer(&self, handle: Handle) -> Result<Arc<NativeRenderer>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(BridgeError::Closed);
        }
        inner
            .renderers
            .resolve(handle)
            .cloned()
            .ok_or(HandleError::Stale(handle).into())
    }

    /// Register a renderer for a remote video source.
    pub fn create(&self, source: SourceId) -> Result<Handle> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BridgeError::Closed);
        }
        let handle = inner
            .renderers
            .bind(Arc::new(NativeRenderer::new(source)))
            .ok_or(HandleError::CapacityExceeded(inner.renderers.len()))?;
        info!(%handle, source, "native renderer created");
        Ok(handle)
    }

    /// Unregister a renderer. Returns `false` for stale handles.
    pub fn destroy(&self, handle: Handle) -> bool {
        let mut inner = self.inner.lock();
        let Some(renderer) = inner.renderers.unbind(handle) else {
            return false;
        };
        inner.dirty.remove(&handle);
        if let Some(frame) = renderer.reset() {
            inner.recycle(frame);
        }
        info!(%handle, source = renderer.source(), "native renderer destroyed");
        true
    }

    /// Bind textures and start accepting frames of `kind`.
    ///
    /// I420 needs one texture per plane. ARGB is accepted but not uploaded.
    pub fn enable_video(&self, handle: Handle, kind: VideoKind, textures: &[TextureDesc]) -> Result<()> {
        let renderer = self.renderer(handle)?;
        if kind == VideoKind::I420 && textures.len() != PLANES {
            return Err(BridgeError::TextureCount {
                kind,
                expected: PLANES,
                actual: textures.len(),
            });
        }
        if kind != VideoKind::I420 {
            warn!(%handle, ?kind, "video kind not supported for upload");
        }

        let mut state = renderer.state.lock();
        state.kind = kind;
        state.textures.clear();
        state.textures.extend_from_slice(textures);
        debug!(%handle, ?kind, textures = textures.len(), "remote video enabled");
        Ok(())
    }

    /// Stop accepting frames and drop the bound textures.
    pub fn disable_video(&self, handle: Handle) -> Result<()> {
        let renderer = self.renderer(handle)?;
        if let Some(frame) = renderer.reset() {
            self.inner.lock().recycle(frame);
        }
        debug!(%handle, "remote video disabled");
        Ok(())
    }

    /// Producer side: park a copy of `frame` for the next update pass.
    ///
    /// Returns `false` when the renderer is not enabled for I420. A parked
    /// frame not yet uploaded is replaced and recycled.
    pub fn on_i420_frame(&self, handle: Handle, frame: &I420Frame<'_>) -> Result<bool> {
        if let Err(err) = frame.validate() {
            warn!(%handle, %err, "dropping malformed frame");
            return Err(err.into());
        }

        let (renderer, buffer) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(BridgeError::Closed);
            }
            let renderer = inner
                .renderers
                .resolve(handle)
                .cloned()
                .ok_or(HandleError::Stale(handle))?;
            if renderer.kind() != VideoKind::I420 {
                return Ok(false);
            }
            let buffer = inner.frames.checkout(frame.byte_size())?;
            (renderer, buffer)
        };

        let mut packet = FramePacket::new(buffer, frame.width, frame.height);
        packet.fill_from(frame)?;

        let (recycle, parked) = {
            let mut state = renderer.state.lock();
            if state.kind == VideoKind::I420 {
                (state.next_frame.replace(packet), true)
            } else {
                // disabled while we were copying
                (Some(packet), false)
            }
        };

        let mut inner = self.inner.lock();
        if let Some(frame) = recycle {
            inner.recycle(frame);
        }
        if parked && inner.renderers.resolve(handle).is_some() {
            inner.dirty.insert(handle);
        }
        Ok(parked)
    }

    /// Render side: upload the parked frame of every dirty renderer.
    ///
    /// Returns the number of frames uploaded.
    #[instrument(skip_all)]
    pub fn do_video_update(&self, api: &mut dyn RenderApi) -> usize {
        let batch: Vec<(Handle, Arc<NativeRenderer>)> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return 0;
            }
            let dirty = std::mem::take(&mut inner.dirty);
            dirty
                .into_iter()
                .filter_map(|h| inner.renderers.resolve(h).map(|r| (h, Arc::clone(r))))
                .collect()
        };

        let mut recycled = Vec::with_capacity(batch.len());
        let mut resized = Vec::new();
        let mut uploaded = 0;

        for (handle, renderer) in batch {
            let (textures, frame) = {
                let mut state = renderer.state.lock();
                (state.textures.clone(), state.next_frame.take())
            };
            let Some(frame) = frame else {
                continue;
            };

            if textures.len() < PLANES {
                recycled.push(frame);
                continue;
            }
            if frame.width() != textures[0].width || frame.height() != textures[0].height {
                warn!(
                    %handle,
                    width = frame.width(),
                    height = frame.height(),
                    "frame resolution differs from bound textures"
                );
                resized.push((frame.width(), frame.height(), handle));
                recycled.push(frame);
                continue;
            }

            upload_i420(api, &textures, &frame);
            api.end_of_frame(self.frame_id.fetch_add(1, Ordering::Relaxed));
            uploaded += 1;
            recycled.push(frame);
        }

        {
            let mut inner = self.inner.lock();
            for frame in recycled {
                inner.recycle(frame);
            }
        }

        if !resized.is_empty() {
            if let Some(callback) = self.size_callback.load_full() {
                for (width, height, handle) in resized {
                    (*callback)(width, height, handle);
                }
            }
        }

        trace!(uploaded, "video update pass");
        uploaded
    }

    /// Install (or clear, with `None`) the texture-size-changed callback.
    pub fn set_texture_size_callback(&self, callback: Option<TextureSizeCallback>) {
        self.size_callback.store(callback.map(Arc::new));
    }

    /// Destroy every renderer and free the frame pool. Idempotent.
    pub fn shutdown(&self) {
        let renderers = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.dirty.clear();
            inner.frames.drain();
            inner.renderers.drain()
        };
        for renderer in &renderers {
            renderer.reset();
        }
        info!(count = renderers.len(), "renderer registry shut down");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renderers waiting for the next update pass.
    pub fn dirty_len(&self) -> usize {
        self.inner.lock().dirty.len()
    }

    pub fn free_frames(&self) -> usize {
        self.inner.lock().frames.free_len()
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<NativeRenderer>> {
        self.renderer(handle).ok()
    }
}

impl Drop for RendererRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Copy each plane row by row into its texture, clamped to the texture size
/// and the backend row pitch.
fn upload_i420(api: &mut dyn RenderApi, textures: &[TextureDesc], frame: &FramePacket) {
    let view = frame.as_frame();
    for (plane, texture) in textures.iter().take(PLANES).enumerate() {
        let desc = VideoDesc {
            format: VideoFormat::R8,
            width: texture.width,
            height: texture.height,
        };
        let (row, rows) = view.plane_dims(plane);
        let Some(update) = api.begin_modify_texture(&desc) else {
            continue;
        };

        let width = (texture.width as usize).min(update.row_pitch).min(row);
        let height = (texture.height as usize).min(rows);
        if update.data.len() < strided_extent(width, height, update.row_pitch) {
            warn!(plane, "mapped texture smaller than its descriptor");
        } else {
            copy_rows(update.data, update.row_pitch, view.plane(plane), row, width, height);
        }
        api.end_modify_texture(texture.texture, &desc);
    }
}
