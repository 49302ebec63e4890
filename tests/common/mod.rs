#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use tokio::task::JoinHandle;
use uuid::Uuid;

use stockledger::entities::asset::{self, AssetStatus, Entity as AssetEntity};
use stockledger::entities::invoice;
use stockledger::{config::AppConfig, db, events, AppState};

/// Test harness over an in-memory SQLite database with migrations applied.
///
/// The pool is capped at one connection for in-memory URLs, so concurrent
/// service calls serialize at the pool the way per-row locks serialize them
/// on Postgres.
pub struct TestApp {
    pub state: AppState,
    _event_task: JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("db connect");

        let db = Arc::new(pool);
        let (sender, receiver) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(receiver));
        let state = AppState::new(db, cfg, sender);

        Self {
            state,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    /// Inserts an asset with the given stock level and unit price.
    pub async fn seed_asset(&self, sku: &str, on_hand: i32, unit_price: Decimal) -> asset::Model {
        asset::ActiveModel {
            sku: Set(sku.to_string()),
            name: Set(format!("Asset {sku}")),
            on_hand: Set(on_hand),
            status: Set(AssetStatus::InStock.as_str().to_string()),
            condition_override: Set(None),
            unit_price: Set(unit_price),
            currency: Set("USD".to_string()),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed asset")
    }

    pub async fn reload_asset(&self, asset_id: Uuid) -> asset::Model {
        AssetEntity::find_by_id(asset_id)
            .one(self.db())
            .await
            .expect("asset query")
            .expect("asset exists")
    }

    pub async fn reload_invoice(&self, invoice_id: Uuid) -> invoice::Model {
        self.state
            .services
            .invoices
            .get_invoice(invoice_id)
            .await
            .expect("invoice query")
            .expect("invoice exists")
    }
}
