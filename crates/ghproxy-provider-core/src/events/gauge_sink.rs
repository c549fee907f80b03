use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use super::{Event, EventSink};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GaugeKey {
    pub metric: String,
    pub principal: String,
    pub api: String,
}

impl GaugeKey {
    pub fn new(metric: &str, principal: &str, api: &str) -> Self {
        Self {
            metric: metric.to_string(),
            principal: principal.to_string(),
            api: api.to_string(),
        }
    }
}

/// Keeps the latest value of each rate-limit gauge per label set.
#[derive(Default)]
pub struct GaugeEventSink {
    values: RwLock<HashMap<GaugeKey, f64>>,
}

impl GaugeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &GaugeKey) -> Option<f64> {
        self.values.read().await.get(key).copied()
    }

    pub async fn snapshot(&self) -> HashMap<GaugeKey, f64> {
        self.values.read().await.clone()
    }
}

impl EventSink for GaugeEventSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Event::RateLimit(snapshot) = event else {
                return;
            };
            let mut values = self.values.write().await;
            for (metric, value) in snapshot.gauges() {
                values.insert(
                    GaugeKey::new(metric, &snapshot.principal, &snapshot.api),
                    value,
                );
            }
        })
    }
}
