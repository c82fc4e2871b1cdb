//! Background jobs. Each one owns its loop and stops on the shutdown signal.

pub mod rate_refresh;
pub mod reconciliation_sweep;
