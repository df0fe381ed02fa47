//! Data aggregation: fan-in from monitoring channels to one numeric fold
//!
//! The aggregator keeps the latest raw payload per channel and, on every
//! reception, recomputes the full aggregate from the whole state map rather
//! than updating incrementally. The fold parses each value as an integer,
//! sums everything that parses, and logs what does not.

use crate::config::{DistributionConfig, Protocol};
use crate::error::{ConfigError, NetworkError};
use crate::observables::MonitoringCallback;
use crate::transport::{HttpTransport, MqttTransport, PubSubTransport, QoS};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timeout for HTTP distribution posts
const HTTP_DISTRIBUTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Downstream consumer of aggregation results
pub enum DistributionSink {
    /// Publish to an MQTT topic with exactly-once delivery
    Mqtt {
        transport: Box<dyn PubSubTransport>,
        channel: String,
    },
    /// POST to an HTTP endpoint
    Http { client: HttpTransport, url: String },
}

impl DistributionSink {
    /// Build the sink selected by configuration
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` for an unknown protocol name or when
    /// the underlying client cannot be constructed.
    pub fn from_config(config: &DistributionConfig) -> Result<Self, ConfigError> {
        match config.protocol.parse::<Protocol>()? {
            Protocol::Mqtt => {
                let transport = MqttTransport::new("hubnodedist", &config.host, config.port)
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                Ok(DistributionSink::Mqtt {
                    transport: Box::new(transport),
                    channel: config.channel.clone(),
                })
            }
            Protocol::Http => {
                let client = HttpTransport::new()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                let url = format!(
                    "http://{}:{}/{}",
                    config.host,
                    config.port,
                    config.channel.trim_start_matches('/')
                );
                Ok(DistributionSink::Http { client, url })
            }
        }
    }

    /// MQTT sink over an injected transport, used by tests and dry runs
    pub fn with_transport(transport: Box<dyn PubSubTransport>, channel: &str) -> Self {
        DistributionSink::Mqtt {
            transport,
            channel: channel.to_string(),
        }
    }

    fn distribute(&mut self, value: &str) -> Result<(), NetworkError> {
        match self {
            DistributionSink::Mqtt { transport, channel } => {
                transport.publish(channel, QoS::ExactlyOnce, value)
            }
            DistributionSink::Http { client, url } => client
                .post_sync(url, None, Some(value), HTTP_DISTRIBUTION_TIMEOUT)
                .map(|_| ()),
        }
    }
}

/// Fold of all known channels' latest values into one sum
///
/// Constructed explicitly at startup and registered as a fan-out callback
/// with the observable manager; never ambient global state.
pub struct Aggregator {
    state: Mutex<HashMap<String, String>>,
    sink: Mutex<Option<DistributionSink>>,
}

impl Aggregator {
    /// Create an aggregator; `sink` of `None` disables distribution
    pub fn new(sink: Option<DistributionSink>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            sink: Mutex::new(sink),
        }
    }

    /// The fan-out callback to register with the observable manager
    pub fn monitoring_callback(self: &Arc<Self>) -> MonitoringCallback {
        let aggregator = Arc::clone(self);
        Arc::new(move |channel, payload| {
            aggregator.data_received(channel, payload);
        })
    }

    /// Record one reception and run the full fold
    ///
    /// Stores the payload as the channel's latest value, recomputes the
    /// aggregate over every known channel, and distributes the result when a
    /// sink is configured. Distribution failures are logged, never
    /// propagated; one failed publish must not disturb monitoring.
    pub fn data_received(&self, channel: &str, payload: &str) {
        let aggregate = {
            let mut state = self.state.lock().unwrap();
            state.insert(channel.to_string(), payload.to_string());
            Self::fold(&state)
        };
        debug!(
            "received '{}' on '{}', aggregate now {}",
            payload, channel, aggregate
        );

        let mut sink = self.sink.lock().unwrap();
        if let Some(ref mut sink) = *sink {
            if let Err(e) = sink.distribute(&aggregate) {
                warn!("failed to distribute aggregate '{}': {}", aggregate, e);
            }
        }
    }

    /// The aggregate over the current state, as its decimal string form
    pub fn current_aggregate(&self) -> String {
        Self::fold(&self.state.lock().unwrap())
    }

    /// Latest raw payload recorded for a channel
    pub fn latest_value(&self, channel: &str) -> Option<String> {
        self.state.lock().unwrap().get(channel).cloned()
    }

    /// Number of channels with recorded state
    pub fn channel_count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    /// Release the sink and clear all aggregation state
    pub fn tear_down(&self) {
        *self.sink.lock().unwrap() = None;
        self.state.lock().unwrap().clear();
        info!("aggregator torn down");
    }

    /// Sum every parseable latest value; skip and log the rest
    fn fold(state: &HashMap<String, String>) -> String {
        let mut sum: i64 = 0;
        for (channel, value) in state {
            match value.trim().parse::<i64>() {
                Ok(v) => sum = sum.saturating_add(v),
                Err(_) => {
                    warn!(
                        "non-numeric value '{}' on channel '{}' excluded from aggregate",
                        value, channel
                    );
                }
            }
        }
        sum.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_fold_includes_untouched_channels() {
        let aggregator = Aggregator::new(None);

        aggregator.data_received("topic/a", "10");
        assert_eq!(aggregator.current_aggregate(), "10");

        // Channel A untouched; its last value still counts
        aggregator.data_received("topic/b", "20");
        assert_eq!(aggregator.current_aggregate(), "30");
    }

    #[test]
    fn test_latest_value_wins_per_channel() {
        let aggregator = Aggregator::new(None);
        aggregator.data_received("topic/a", "10");
        aggregator.data_received("topic/a", "15");
        assert_eq!(aggregator.current_aggregate(), "15");
        assert_eq!(aggregator.latest_value("topic/a"), Some("15".to_string()));
    }

    #[test]
    fn test_non_numeric_values_skipped_not_fatal() {
        let aggregator = Aggregator::new(None);
        aggregator.data_received("topic/a", "10");
        aggregator.data_received("topic/b", "offline");
        aggregator.data_received("topic/c", "5");
        assert_eq!(aggregator.current_aggregate(), "15");
        assert_eq!(aggregator.channel_count(), 3);
    }

    #[test]
    fn test_negative_and_padded_values() {
        let aggregator = Aggregator::new(None);
        aggregator.data_received("topic/a", " -4 ");
        aggregator.data_received("topic/b", "9");
        assert_eq!(aggregator.current_aggregate(), "5");
    }

    #[test]
    fn test_distribution_publishes_each_aggregate() {
        let mock = MockTransport::new();
        let sink = DistributionSink::with_transport(Box::new(mock.clone()), "downstream");
        let aggregator = Aggregator::new(Some(sink));

        aggregator.data_received("topic/a", "42");
        aggregator.data_received("topic/b", "8");

        let publishes = mock.publishes();
        assert_eq!(publishes.len(), 2);
        assert_eq!(
            publishes[0],
            ("downstream".to_string(), QoS::ExactlyOnce, "42".to_string())
        );
        assert_eq!(
            publishes[1],
            ("downstream".to_string(), QoS::ExactlyOnce, "50".to_string())
        );
    }

    #[test]
    fn test_distribution_failure_does_not_disturb_state() {
        let sink =
            DistributionSink::with_transport(Box::new(MockTransport::failing_publish()), "down");
        let aggregator = Aggregator::new(Some(sink));

        aggregator.data_received("topic/a", "7");
        assert_eq!(aggregator.current_aggregate(), "7");
    }

    #[test]
    fn test_tear_down_clears_state_and_sink() {
        let mock = MockTransport::new();
        let sink = DistributionSink::with_transport(Box::new(mock.clone()), "down");
        let aggregator = Aggregator::new(Some(sink));

        aggregator.data_received("topic/a", "1");
        aggregator.tear_down();

        assert_eq!(aggregator.channel_count(), 0);
        assert_eq!(aggregator.current_aggregate(), "0");

        // No further distribution happens after teardown
        aggregator.data_received("topic/a", "2");
        assert_eq!(mock.publishes().len(), 1);
    }

    #[test]
    fn test_unknown_distribution_protocol_is_fatal() {
        let config = DistributionConfig {
            protocol: "smoke-signals".to_string(),
            host: "h".to_string(),
            port: 1,
            channel: "c".to_string(),
        };
        assert!(DistributionSink::from_config(&config).is_err());
    }

    #[test]
    fn test_callback_feeds_aggregator() {
        let aggregator = Arc::new(Aggregator::new(None));
        let callback = aggregator.monitoring_callback();
        callback("topic/a", "11");
        callback("topic/b", "31");
        assert_eq!(aggregator.current_aggregate(), "42");
    }
}
