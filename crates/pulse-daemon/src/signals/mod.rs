//! Signal evaluation: depth-aware arbitrage math, trade/wallet
//! classification, and the two engine job bodies.

pub mod arb;
pub mod engine;
pub mod trades;

pub use arb::{arb_severity, avg_ask, compute_arb, fill_levels, ArbEvaluation, ArbParams};
pub use engine::{run_arb_engine, run_trade_engine};
pub use trades::{build_trade_payload, is_dormant, is_new_wallet, severity_for_trade};
