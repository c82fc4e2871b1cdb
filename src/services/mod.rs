//! Services module for business logic and integrations

pub mod exchange_rate;
pub mod fee_calculation;
pub mod kyc;
pub mod ledger;
pub mod payment_orchestrator;
pub mod qr_signer;
pub mod rate_limiter;
pub mod rate_providers;
pub mod reconciliation;
pub mod wallet_lookup;
pub mod webhook_processor;

// Re-export the entry points wired by main
pub use exchange_rate::{ExchangeRateService, ExchangeRateServiceConfig};
pub use kyc::{KycConfig, KycGate};
pub use ledger::{LedgerConfig, LedgerService, SendMoneyRequest};
pub use payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
pub use qr_signer::{QrConfig, QrService};
pub use rate_limiter::{InMemoryRateLimiter, RateLimitConfig, RateLimitStore};
pub use reconciliation::{GatewayUpdate, ReconciliationOutcome, ReconciliationService};
pub use wallet_lookup::WalletLookupService;
pub use webhook_processor::WebhookProcessor;
