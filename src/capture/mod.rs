pub mod frame;
pub mod packet;

pub use frame::{CopyPath, I420Frame};
pub use packet::FramePacket;
