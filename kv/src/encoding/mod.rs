pub mod base64_codec;
pub mod keycode;

pub use base64_codec::Base64Codec;
