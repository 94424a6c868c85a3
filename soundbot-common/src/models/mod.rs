pub mod voice;

pub use voice::*;
