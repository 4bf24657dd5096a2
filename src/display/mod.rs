pub mod handle;
pub mod registry;
pub mod texture;

pub use handle::{Handle, HandleTable};
pub use registry::{NativeRenderer, RendererRegistry, SourceId, TextureSizeCallback};
pub use texture::{RenderApi, TextureDesc, TextureId, TextureUpdate, VideoDesc, VideoFormat, VideoKind};
