pub mod asset_status;
pub mod availability;
pub mod credits;
pub mod invoices;
pub mod payments;
pub mod reservations;
pub mod returns;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

/// All engine services wired over one pool and one event channel.
#[derive(Clone)]
pub struct AppServices {
    pub invoices: invoices::InvoiceService,
    pub reservations: reservations::ReservationService,
    pub payments: payments::PaymentService,
    pub returns: returns::ReturnService,
    pub credits: credits::CreditService,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            invoices: invoices::InvoiceService::new(db_pool.clone(), event_sender.clone()),
            reservations: reservations::ReservationService::new(
                db_pool.clone(),
                event_sender.clone(),
            ),
            payments: payments::PaymentService::new(db_pool.clone(), event_sender.clone()),
            returns: returns::ReturnService::new(db_pool.clone(), event_sender.clone()),
            credits: credits::CreditService::new(db_pool, event_sender),
        }
    }
}
