//! Business services wired over the store and the external collaborators.
//! Handlers receive these through `AppState`; nothing here is global.

pub mod access;
pub mod balances;
pub mod knowledge;
pub mod signals;
pub mod wagers;

pub use access::{AccessService, CreditSummary, Unstaked};
pub use balances::TokenBalances;
pub use knowledge::{KnowledgeAnswer, KnowledgeService};
pub use signals::{ProviderProfile, SignalService};
pub use wagers::WagerLedger;
