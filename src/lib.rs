//! Prediction-market sidechain core.
//!
//! Three tightly coupled pieces: the content-addressed market record store
//! (branches, decisions, markets, trades, votes, outcomes) over an ordered
//! embedded keyspace; the LMSR automated market maker pricing trades over
//! a combinatorial state space; and the voter-consensus outcome engine
//! that folds each closed voting period into reputation updates, final
//! decision values and payouts.
//!
//! The surrounding node supplies block validation, the wallet, and
//! broadcast; this crate consumes those through the traits in
//! [`interfaces`].

pub mod interfaces;
pub mod math;
pub mod serialize;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

pub use state::{ballot, Error, State};
pub use store::{CancelToken, MarketTree};
