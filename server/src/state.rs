use std::sync::Arc;

use crate::config::Config;
use crate::payment::PaymentGateway;
use crate::pricing::BookingCalculator;
use crate::services::{BookingService, EventService};
use crate::store::Store;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub events: Arc<EventService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let bookings = BookingService::new(
            store.clone(),
            gateway,
            BookingCalculator::new(config.loyalty_policy),
            config.currency.clone(),
            config.max_tickets_per_booking,
        );

        Self {
            bookings: Arc::new(bookings),
            events: Arc::new(EventService::new(store)),
            config: Arc::new(config),
        }
    }
}
