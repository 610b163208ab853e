//! Payment gateway collaborator.
//!
//! The gateway is an external system reached over the network; this module
//! pins down the slice of its contract the saga needs - create an order,
//! fetch its status - and provides an in-tree mock for development and
//! tests. Callback verification lives in [`crate::signature`], not here:
//! callbacks arrive at this service, they are not fetched from the gateway.

use evently_core::ids::OrderId;
use evently_core::money::Money;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;

/// Gateway-side status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOrderStatus {
    /// Order created, payment not yet attempted.
    Created,
    /// Payment captured against this order.
    Paid,
}

/// Errors from the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway rejected the order outright.
    #[error("gateway rejected order: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },
    /// The call did not complete in time.
    #[error("gateway timeout")]
    Timeout,
    /// The gateway is unreachable or erroring.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// No order with the given id.
    #[error("order not found: {0}")]
    OrderNotFound(String),
}

/// The gateway operations this service depends on.
pub trait PaymentGateway: Send + Sync {
    /// Create an order for the given amount. Returns the gateway's opaque
    /// order id, which becomes the correlation key for callbacks.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the order cannot be created.
    fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<OrderId, GatewayError>> + Send + '_>>;

    /// Fetch the gateway-side status of an order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::OrderNotFound`] for unknown orders.
    fn fetch_order(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayOrderStatus, GatewayError>> + Send + '_>>;
}

#[derive(Default)]
struct MockGatewayState {
    orders: HashMap<String, GatewayOrderStatus>,
    counter: u64,
    fail_next: Option<GatewayError>,
}

/// In-process gateway for development and tests.
///
/// Issues deterministic-prefix order ids and can be scripted to fail the
/// next order creation, to exercise the retry and redelivery paths.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockGatewayState>,
}

impl MockGateway {
    /// Creates a mock gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_order` call fail with the given error.
    pub fn fail_next_order(&self, error: GatewayError) {
        self.with_state(|state| state.fail_next = Some(error));
    }

    /// Mark an order as paid on the gateway side, as a completed checkout
    /// would.
    pub fn mark_paid(&self, order_id: &OrderId) {
        self.with_state(|state| {
            state
                .orders
                .insert(order_id.as_str().to_string(), GatewayOrderStatus::Paid);
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockGatewayState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl PaymentGateway for MockGateway {
    fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<OrderId, GatewayError>> + Send + '_>> {
        let receipt = receipt.to_string();
        Box::pin(async move {
            if let Some(error) = self.with_state(|state| state.fail_next.take()) {
                return Err(error);
            }

            let order_id = self.with_state(|state| {
                state.counter += 1;
                let id = format!("order_MOCK{:06}", state.counter);
                state.orders.insert(id.clone(), GatewayOrderStatus::Created);
                OrderId::new(id)
            });

            tracing::info!(
                order_id = %order_id,
                amount = %amount,
                receipt = %receipt,
                "mock gateway order created"
            );
            Ok(order_id)
        })
    }

    fn fetch_order(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayOrderStatus, GatewayError>> + Send + '_>> {
        let order_id = order_id.clone();
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .orders
                    .get(order_id.as_str())
                    .copied()
                    .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))
            })
        })
    }
}
