use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{CardGateway, MobileMoneyGateway};
use crate::payments::providers::{MomoProvider, PaystackProvider};
use crate::payments::types::ProviderName;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub enabled_providers: Vec<ProviderName>,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            enabled_providers: vec![ProviderName::Paystack, ProviderName::Momo],
        }
    }
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "paystack,momo".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }
        Ok(Self { enabled_providers })
    }
}

/// The gateways the orchestrator and webhook path talk to. A slot is empty
/// when the provider is disabled or not configured.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    card: Option<Arc<dyn CardGateway>>,
    mobile_money: Option<Arc<dyn MobileMoneyGateway>>,
}

impl PaymentGateways {
    pub fn new(
        card: Option<Arc<dyn CardGateway>>,
        mobile_money: Option<Arc<dyn MobileMoneyGateway>>,
    ) -> Self {
        Self { card, mobile_money }
    }

    pub fn with_card(mut self, gateway: Arc<dyn CardGateway>) -> Self {
        self.card = Some(gateway);
        self
    }

    pub fn with_mobile_money(mut self, gateway: Arc<dyn MobileMoneyGateway>) -> Self {
        self.mobile_money = Some(gateway);
        self
    }

    /// Builds every enabled provider whose credentials are present. A provider
    /// that fails to configure is logged and left out rather than aborting start-up.
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        let mut gateways = Self::default();

        if config.enabled_providers.contains(&ProviderName::Paystack) {
            match PaystackProvider::from_env() {
                Ok(provider) => {
                    info!("💳 Paystack gateway configured");
                    gateways.card = Some(Arc::new(provider));
                }
                Err(e) => warn!(error = %e, "Paystack enabled but not configured"),
            }
        }
        if config.enabled_providers.contains(&ProviderName::Momo) {
            match MomoProvider::from_env() {
                Ok(provider) => {
                    info!("📱 Mobile-money gateway configured");
                    gateways.mobile_money = Some(Arc::new(provider));
                }
                Err(e) => warn!(error = %e, "MoMo enabled but not configured"),
            }
        }

        Ok(gateways)
    }

    pub fn card(&self) -> PaymentResult<&Arc<dyn CardGateway>> {
        self.card.as_ref().ok_or_else(|| disabled(ProviderName::Paystack))
    }

    pub fn mobile_money(&self) -> PaymentResult<&Arc<dyn MobileMoneyGateway>> {
        self.mobile_money
            .as_ref()
            .ok_or_else(|| disabled(ProviderName::Momo))
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut providers = Vec::new();
        if let Some(card) = &self.card {
            providers.push(card.name());
        }
        if let Some(momo) = &self.mobile_money {
            providers.push(momo.name());
        }
        providers
    }
}

fn disabled(provider: ProviderName) -> PaymentError {
    PaymentError::ValidationError {
        message: format!("provider {} is disabled", provider),
        field: Some("provider".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::PaystackConfig;

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("paystack"),
            Ok(ProviderName::Paystack)
        ));
        assert!(ProviderName::from_str("unknown").is_err());
    }

    #[test]
    fn empty_gateways_report_disabled_providers() {
        let gateways = PaymentGateways::default();
        assert!(gateways.card().is_err());
        assert!(gateways.mobile_money().is_err());
        assert!(gateways.list_available_providers().is_empty());
    }

    #[test]
    fn list_available_providers_returns_configured() {
        let paystack = PaystackProvider::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            ..PaystackConfig::default()
        })
        .unwrap();
        let gateways = PaymentGateways::default().with_card(Arc::new(paystack));
        assert_eq!(
            gateways.list_available_providers(),
            vec![ProviderName::Paystack]
        );
        assert!(gateways.card().is_ok());
    }
}
