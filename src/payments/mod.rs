//! External payment gateways: a card/bank processor and a mobile-money
//! network, each behind a trait so the orchestrator can run against mocks.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{PaymentFactoryConfig, PaymentGateways};
pub use provider::{CardGateway, MobileMoneyGateway};
pub use types::{MobileMoneyFlow, Money, PaymentState, ProviderName};
