// src/lib.rs

pub mod eventbus;
pub mod voice;
pub mod test_utils;

pub use soundbot_common::error::Error;
pub use voice::registry::SessionRegistry;
pub use voice::subscription::SessionSubscription;
