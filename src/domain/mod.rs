pub mod knowledge;
pub mod provider;
pub mod signal;
pub mod wager;

pub use knowledge::*;
pub use provider::*;
pub use signal::*;
pub use wager::*;

use chrono::Utc;
use rand::Rng;

/// Opaque id: `<prefix>_<unix ms, hex>_<random hex>`
pub fn new_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}_{:x}_{:08x}", prefix, millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let a = new_id("sig");
        let b = new_id("sig");
        assert!(a.starts_with("sig_"));
        assert_eq!(a.split('_').count(), 3);
        assert_ne!(a, b);
    }
}
