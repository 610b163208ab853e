//! # Evently App
//!
//! Process wiring for the Evently platform. [`Platform::start`] builds the
//! three services around an explicitly constructed event bus, registers
//! each service's consumer with its own worker pool and dead-letter queue,
//! and spawns the periodic outbox sweepers. [`Platform::shutdown`] signals
//! every task and drains in-flight handlers before returning.
//!
//! The bus and the payment gateway are passed in by the caller: production
//! wires `RedpandaEventBus` and a real gateway client, the demo binary and
//! the integration tests wire the in-memory bus and the mock gateway. No
//! component reaches for an ambient global.

use evently_auth::{TokenCodec, TokenConfig};
use evently_booking::BookingService;
use evently_bus::{RedpandaConfig, RedpandaEventBus};
use evently_core::clock::Clock;
use evently_core::event_bus::{EventBus, EventBusError};
use evently_notification::{NotificationProjector, NotificationSender};
use evently_payment::{PaymentConfig, PaymentGateway, PaymentService};
use evently_runtime::consumer::{EventConsumer, EventHandler};
use evently_runtime::dead_letter::{DeadLetterQueue, InMemoryDeadLetterQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Platform-level settings.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Payment service settings.
    pub payment: PaymentConfig,
    /// Token signing settings.
    pub token: TokenConfig,
    /// How often the outbox sweepers run.
    pub sweep_interval: Duration,
    /// How long an unacknowledged envelope may lag before the sweep
    /// re-publishes it.
    pub sweep_lag: chrono::Duration,
}

impl PlatformConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            payment: PaymentConfig::from_env(),
            token: TokenConfig::from_env(),
            sweep_interval: Duration::from_secs(30),
            sweep_lag: chrono::Duration::seconds(30),
        }
    }
}

/// A running Evently process: services, consumers, and sweepers.
pub struct Platform {
    /// Booking state machine.
    pub bookings: Arc<BookingService>,
    /// Payment state machine.
    pub payments: Arc<PaymentService>,
    /// Notification projector.
    pub notifications: Arc<NotificationProjector>,
    /// Shared dead-letter queue, operator-visible.
    pub dead_letters: Arc<InMemoryDeadLetterQueue>,
    /// Token codec for the boundary filter.
    pub token_codec: TokenCodec,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Platform {
    /// Build the services, register their consumers, and start the
    /// background sweepers.
    #[must_use]
    pub fn start(
        bus: Arc<dyn EventBus>,
        gateway: Arc<dyn PaymentGateway>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        config: PlatformConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());

        let bookings = Arc::new(BookingService::new(Arc::clone(&bus), Arc::clone(&clock)));
        let payments = Arc::new(PaymentService::new(
            Arc::clone(&bus),
            gateway,
            Arc::clone(&clock),
            config.payment.clone(),
        ));
        let notifications = Arc::new(NotificationProjector::new(sender, Arc::clone(&clock)));
        let token_codec = TokenCodec::new(config.token.secret.as_bytes(), Arc::clone(&clock));

        let mut tasks = Vec::new();

        tasks.push(spawn_consumer(
            "booking",
            BookingService::subscribed_topics(),
            &bus,
            Arc::clone(&bookings) as Arc<dyn EventHandler>,
            &dead_letters,
            &shutdown,
        ));
        tasks.push(spawn_consumer(
            "payment",
            PaymentService::subscribed_topics(),
            &bus,
            Arc::clone(&payments) as Arc<dyn EventHandler>,
            &dead_letters,
            &shutdown,
        ));
        tasks.push(spawn_consumer(
            "notification",
            NotificationProjector::subscribed_topics(),
            &bus,
            Arc::clone(&notifications) as Arc<dyn EventHandler>,
            &dead_letters,
            &shutdown,
        ));

        // Outbox sweepers: periodic re-publish of anything whose broker ack
        // was lost between state commit and publish.
        {
            let bookings = Arc::clone(&bookings);
            let mut rx = shutdown.subscribe();
            let interval = config.sweep_interval;
            let lag = config.sweep_lag;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => bookings.sweep_outbox(lag).await,
                    }
                }
            }));
        }
        {
            let payments = Arc::clone(&payments);
            let mut rx = shutdown.subscribe();
            let interval = config.sweep_interval;
            let lag = config.sweep_lag;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => payments.sweep_outbox(lag).await,
                    }
                }
            }));
        }

        tracing::info!("evently platform started");

        Self {
            bookings,
            payments,
            notifications,
            dead_letters,
            token_codec,
            shutdown,
            tasks,
        }
    }

    /// Signal shutdown and drain every consumer and sweeper.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("evently platform stopped");
    }
}

/// Build the production Redpanda bus from env configuration.
///
/// No explicit consumer group is set: each consumer derives its group from
/// its topic set, so the three consumers in this process end up in three
/// distinct groups and every service sees every envelope.
///
/// # Errors
///
/// Returns [`EventBusError::ConnectionFailed`] on invalid broker
/// configuration.
pub fn redpanda_bus_from_env() -> Result<Arc<dyn EventBus>, EventBusError> {
    let config = RedpandaConfig::from_env();
    Ok(Arc::new(RedpandaEventBus::from_config(&config)?))
}

fn spawn_consumer(
    name: &str,
    topics: Vec<String>,
    bus: &Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    dead_letters: &Arc<InMemoryDeadLetterQueue>,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    EventConsumer::builder()
        .name(name)
        .topics(topics)
        .event_bus(Arc::clone(bus))
        .handler(handler)
        .dead_letters(Arc::clone(dead_letters) as Arc<dyn DeadLetterQueue>)
        .shutdown(shutdown.subscribe())
        .build()
        .spawn()
}
