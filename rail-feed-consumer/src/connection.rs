use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::Delay;
use crate::error::{ConsumerError, TransportError};
use crate::transport::{FeedTransport, Subscription, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Failed => "failed",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            ConnectionState::Disconnected => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Subscribed => 2.0,
            ConnectionState::Failed => 3.0,
        }
    }
}

/// Bounded retry schedule for connect+subscribe.
///
/// - max_attempts: attempts before giving up for good
/// - initial_delay: wait after the first failure
/// - multiplier: growth per further failure (1.0 keeps the delay fixed)
/// - max_delay: cap for the computed delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(30, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, 1.0, delay)
    }

    /// Delay after the `failures`-th consecutive failure, counting from 1.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let pow = self.multiplier.powi(exponent);
        let scaled = if pow.is_finite() {
            self.initial_delay.mul_f64(pow)
        } else {
            self.max_delay
        };
        scaled.min(self.max_delay)
    }
}

/// Receives the payload of every delivery, after it has been acknowledged.
#[async_trait]
pub trait DeliveryHandler: Send {
    async fn handle(&mut self, payload: &[u8]);
}

/// Owns the subscription: connects, reconnects after losing the broker, and
/// feeds deliveries to a handler. Gives up for good once `RetryPolicy::max_attempts`
/// consecutive attempts have failed.
pub struct ConnectionManager<T, D> {
    transport: T,
    delay: D,
    policy: RetryPolicy,
    subscription: Subscription,
    state: watch::Sender<ConnectionState>,
    failed_attempts: u32,
}

impl<T, D> ConnectionManager<T, D>
where
    T: FeedTransport,
    D: Delay,
{
    pub fn new(transport: T, subscription: Subscription, policy: RetryPolicy, delay: D) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            delay,
            policy,
            subscription,
            state,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state changes from elsewhere, e.g. the health endpoints.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Consecutive failed attempts in the current retry sequence.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = previous.as_str(), to = next.as_str(), "Connection state changed");
        }
        metrics::gauge!("rail_feed_connection_state").set(next.gauge_value());
    }

    /// Run the retry sequence until the subscription is up or the ceiling is hit.
    pub async fn establish(&mut self) -> Result<(), ConsumerError> {
        if self.state() == ConnectionState::Failed {
            return Err(ConsumerError::AlreadyFailed);
        }
        self.set_state(ConnectionState::Connecting);

        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "Connecting");
            metrics::counter!("rail_feed_connect_attempts_total").increment(1);

            match self.connect_and_subscribe().await {
                Ok(()) => {
                    self.failed_attempts = 0;
                    self.set_state(ConnectionState::Subscribed);
                    return Ok(());
                }
                Err(e) => {
                    self.failed_attempts += 1;
                    warn!(attempt, max_attempts, error = %e, "Connect attempt failed");
                    metrics::counter!("rail_feed_connect_failures_total").increment(1);
                    self.transport.close().await;
                    if attempt < max_attempts {
                        self.delay
                            .wait(self.policy.next_delay(self.failed_attempts))
                            .await;
                    }
                }
            }
        }

        error!(
            attempts = self.failed_attempts,
            "Connect attempts exhausted, not retrying again"
        );
        self.set_state(ConnectionState::Failed);
        Err(ConsumerError::ConnectAttemptsExhausted {
            attempts: self.failed_attempts,
        })
    }

    async fn connect_and_subscribe(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        self.transport.subscribe(&self.subscription).await
    }

    /// Acknowledge and hand over deliveries, reconnecting whenever the
    /// connection drops. Only returns once reconnecting has failed for good.
    pub async fn run<H>(&mut self, handler: &mut H) -> Result<(), ConsumerError>
    where
        H: DeliveryHandler + ?Sized,
    {
        loop {
            if self.state() != ConnectionState::Subscribed {
                self.establish().await?;
            }

            match self.transport.next_event().await {
                TransportEvent::Delivery(delivery) => {
                    metrics::counter!("rail_feed_deliveries_total").increment(1);
                    if let Err(e) = self.transport.ack(&delivery).await {
                        warn!(
                            message_id = delivery.message_id,
                            error = %e,
                            "Failed to acknowledge delivery"
                        );
                    }
                    handler.handle(&delivery.payload).await;
                }
                TransportEvent::Disconnected => {
                    error!("Disconnected from the feed, reconnecting");
                    self.connection_lost().await;
                }
                TransportEvent::HeartbeatTimeout => {
                    error!("Heartbeat timeout, reconnecting");
                    self.connection_lost().await;
                }
            }
        }
    }

    async fn connection_lost(&mut self) {
        metrics::counter!("rail_feed_disconnects_total").increment(1);
        self.transport.close().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Disconnect for shutdown. A failed manager stays failed.
    pub async fn close(&mut self) {
        self.transport.close().await;
        if self.state() != ConnectionState::Failed {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}
