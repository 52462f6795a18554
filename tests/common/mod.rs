#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use taskloom::ledger::{BudgetConfig, CostLedger, ModelPricing, PricingTable};
use taskloom::message::Message;
use taskloom::models::{Completion, ModelClient, ModelError};
use taskloom::router::{Complexity, ModelRouter};

/// Model id every complexity bucket routes to in tests.
pub const MOCK_MODEL: &str = "mock-model";

enum Scripted {
    Ok(Completion),
    Transient(String),
    Permanent(String),
}

/// Scripted model client: responses are served in push order, one per
/// call; an exhausted script serves a default completion.
pub struct MockModelClient {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<std::time::Duration>>,
}

impl MockModelClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        })
    }

    /// Delay every completion, to keep a driver observably in flight.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn push_completion(&self, content: &str, input_tokens: u64, output_tokens: u64) {
        self.script.lock().push_back(Scripted::Ok(Completion {
            content: content.to_string(),
            input_tokens,
            output_tokens,
        }));
    }

    pub fn push_transient(&self, message: &str) {
        self.script
            .lock()
            .push_back(Scripted::Transient(message.to_string()));
    }

    pub fn push_permanent(&self, message: &str) {
        self.script
            .lock()
            .push_back(Scripted::Permanent(message.to_string()));
    }

    /// Model ids of every call served so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        model_id: &str,
        _messages: &[Message],
        _max_tokens: u32,
    ) -> Result<Completion, ModelError> {
        self.calls.lock().push(model_id.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().pop_front() {
            Some(Scripted::Ok(completion)) => Ok(completion),
            Some(Scripted::Transient(message)) => Err(ModelError::Transient {
                provider: "mock",
                message,
            }),
            Some(Scripted::Permanent(message)) => Err(ModelError::Permanent {
                provider: "mock",
                message,
            }),
            None => Ok(Completion {
                content: "ok".to_string(),
                input_tokens: 1000,
                output_tokens: 500,
            }),
        }
    }
}

/// Router sending every complexity bucket to [`MOCK_MODEL`].
pub fn uniform_router() -> ModelRouter {
    ModelRouter::default()
        .with_model(Complexity::Simple, MOCK_MODEL)
        .with_model(Complexity::Medium, MOCK_MODEL)
        .with_model(Complexity::Complex, MOCK_MODEL)
}

/// Ledger pricing [`MOCK_MODEL`] at $1 per 1k tokens each way, so the
/// cost of a call is `(input + output) / 1000` dollars.
pub fn mock_ledger(budget: BudgetConfig) -> Arc<CostLedger> {
    let pricing = PricingTable::empty().with_model(MOCK_MODEL, ModelPricing::new(1.0, 1.0));
    Arc::new(CostLedger::new(pricing, budget))
}

/// Budget config with no ceilings.
pub fn unlimited_budget() -> BudgetConfig {
    BudgetConfig {
        daily_ceiling: 0.0,
        monthly_ceiling: 0.0,
        throttle_ratio: 0.8,
    }
}
