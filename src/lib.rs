//! Stockledger
//!
//! Transactional inventory reservation and invoice payment engine built
//! on sea-orm. Invoices reserve stock through their line items, a payment
//! ledger drives the invoice state machine, and returns feed restocking
//! and store credit.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

/// Everything a caller needs to drive the engine: the pool, the loaded
/// configuration, the event channel, and the wired services.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = services::AppServices::new(db.clone(), event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}
