pub mod access;
pub mod auth;
pub mod health;
pub mod knowledge;
pub mod markets;
pub mod providers;
pub mod signals;
pub mod wagers;

pub use access::*;
pub use auth::*;
pub use health::*;
pub use knowledge::*;
pub use markets::*;
pub use providers::*;
pub use signals::*;
pub use wagers::*;
