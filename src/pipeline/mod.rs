pub mod crop;
pub mod encoder;
pub mod frame_buffer;
pub mod stream;

pub use crop::{crop_box, crop_frame, CropRect, CropRegion, PixelBox};
pub use encoder::{encode_jpeg, multipart_part, Placeholder};
pub use frame_buffer::{FrameBuffer, RunId};
pub use stream::{MjpegStream, StreamVariant};
