//! Core building blocks: frame codec and value codec.

pub mod codec;
pub mod frame;
