pub mod voice_traits;

pub use voice_traits::*;
