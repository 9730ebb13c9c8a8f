//! Lookup from payment method to adapter.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::cod::CashOnDeliveryGateway;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::esewa::EsewaGateway;
use crate::gateway::PaymentGateway;
use crate::khalti::KhaltiGateway;
use doko_core::PaymentMethod;

/// Adapters keyed by the method they serve. Cheap to clone.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cash on delivery plus whichever digital gateways are configured.
    pub fn from_configs(
        esewa: Option<GatewayConfig>,
        khalti: Option<GatewayConfig>,
    ) -> GatewayResult<Self> {
        let mut registry = GatewayRegistry::new().with(Arc::new(CashOnDeliveryGateway));

        if let Some(config) = esewa {
            registry = registry.with(Arc::new(EsewaGateway::new(config)?));
        }
        if let Some(config) = khalti {
            registry = registry.with(Arc::new(KhaltiGateway::new(config)?));
        }

        info!(methods = ?registry.methods(), "Payment gateways registered");
        Ok(registry)
    }

    /// Registers `gateway` under its own method, replacing any previous one.
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> GatewayResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&method)
            .cloned()
            .ok_or(GatewayError::NotConfigured(method))
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.gateways.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}
