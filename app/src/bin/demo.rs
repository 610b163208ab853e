//! End-to-end saga demo against the in-memory bus and mock gateway.
//!
//! Runs the two canonical purchase flows and prints each step:
//! a booking that confirms after a verified settlement callback, and a
//! booking that fails after a gateway failure webhook.

use anyhow::{Context, Result};
use evently_app::{Platform, PlatformConfig};
use evently_booking::Booking;
use evently_core::clock::SystemClock;
use evently_core::contracts::BookingStatus;
use evently_core::event_bus::EventBus;
use evently_core::ids::{EventId, UserId};
use evently_notification::ConsoleSender;
use evently_payment::{MockGateway, PaymentStatus, WebhookSigner};
use evently_testing::InMemoryEventBus;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PlatformConfig::from_env();
    let signer = WebhookSigner::new(config.payment.webhook_secret.as_bytes());

    let bus = Arc::new(InMemoryEventBus::new());
    let platform = Platform::start(
        Arc::clone(&bus) as Arc<dyn EventBus>,
        Arc::new(MockGateway::new()),
        Arc::new(ConsoleSender::new()),
        Arc::new(SystemClock),
        config,
    );

    show_trust_propagation(&platform)?;
    run_happy_path(&platform, &signer).await?;
    run_failure_path(&platform).await?;

    platform.shutdown().await;
    Ok(())
}

/// Issue a token the way the auth service would, then resolve it the way
/// the gateway filter does before forwarding trusted headers downstream.
fn show_trust_propagation(platform: &Platform) -> Result<()> {
    use evently_auth::{Role, TrustedHeaders, authorize};

    let user_id = UserId::new();
    let token = platform
        .token_codec
        .issue("alice", Role::Customer, user_id, chrono::Duration::hours(1))
        .context("issue token")?;

    let header = format!("Bearer {token}");
    let claims = authorize(&platform.token_codec, Some(&header))
        .context("verify bearer token at the boundary")?;
    let trusted = TrustedHeaders::from_claims(&claims);
    tracing::info!(
        user_id = %trusted.user_id,
        role = %trusted.role,
        "boundary verified token; forwarding trusted headers"
    );

    // A tampered token is denied with the same generic error as any other
    // failure.
    let forged = format!("Bearer {token}x");
    anyhow::ensure!(authorize(&platform.token_codec, Some(&forged)).is_err());
    Ok(())
}

async fn run_happy_path(platform: &Platform, signer: &WebhookSigner) -> Result<()> {
    tracing::info!("--- scenario: booking confirmed after settlement ---");
    let user_id = UserId::new();

    let booking = platform
        .bookings
        .create(user_id, EventId::new(), 2)
        .await
        .context("create booking")?;
    tracing::info!(booking_id = %booking.id, status = %booking.status, "booking created");

    // The payment service picks up booking.created and opens a gateway
    // order; wait for it.
    let payment = wait_for_payment(platform, &booking).await?;
    tracing::info!(
        payment_id = %payment.id,
        order_id = %payment.order_id,
        amount = %payment.amount,
        "payment initiated from booking.created"
    );

    // Simulate the gateway's settlement callback, properly signed.
    let signature = signer.sign(payment.order_id.as_str(), "pay_demo_1");
    let settled = platform
        .payments
        .verify_and_settle(&payment.order_id, "pay_demo_1", &signature)
        .await
        .context("verify settlement callback")?;
    tracing::info!(payment_id = %settled.id, status = %settled.status, "payment settled");
    anyhow::ensure!(settled.status == PaymentStatus::Success);

    let confirmed = wait_for_status(platform, &booking, BookingStatus::Confirmed).await?;
    tracing::info!(
        booking_id = %confirmed.id,
        payment_ref = %confirmed.payment_ref.as_ref().map_or("-".to_string(), ToString::to_string),
        "booking confirmed"
    );

    for notification in platform.notifications.notifications_for_user(user_id).await {
        tracing::info!(subject = %notification.subject, body = %notification.body, "notification");
    }
    Ok(())
}

async fn run_failure_path(platform: &Platform) -> Result<()> {
    tracing::info!("--- scenario: booking failed after gateway failure ---");
    let user_id = UserId::new();

    let booking = platform
        .bookings
        .create(user_id, EventId::new(), 1)
        .await
        .context("create booking")?;
    let payment = wait_for_payment(platform, &booking).await?;

    platform
        .payments
        .fail(&payment.order_id, "card declined")
        .await
        .context("gateway failure webhook")?;

    let failed = wait_for_status(platform, &booking, BookingStatus::Failed).await?;
    tracing::info!(booking_id = %failed.id, status = %failed.status, "booking failed");

    for notification in platform.notifications.notifications_for_user(user_id).await {
        tracing::info!(subject = %notification.subject, body = %notification.body, "notification");
    }
    Ok(())
}

async fn wait_for_payment(
    platform: &Platform,
    booking: &Booking,
) -> Result<evently_payment::Payment> {
    for _ in 0..100 {
        if let Ok(payment) = platform.payments.payment_for_booking(booking.id).await {
            return Ok(payment);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("payment was never initiated for booking {}", booking.id)
}

async fn wait_for_status(
    platform: &Platform,
    booking: &Booking,
    expected: BookingStatus,
) -> Result<Booking> {
    for _ in 0..100 {
        let current = platform.bookings.get(booking.id).await?;
        if current.status == expected {
            return Ok(current);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("booking {} never reached {expected}", booking.id)
}
