pub mod cdr;
pub mod image;
pub mod messages;
pub mod pixels;

pub use image::{decode, summarize, write_png, ImageMessage};
pub use messages::MessageKind;
