//! Session secrets: the bearer credential and the anti-forgery token.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
