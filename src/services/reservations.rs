//! Reservation Guard
//!
//! Transactionally validates and commits new reservations. Every mutating
//! path locks the asset row, recomputes availability under that lock with the
//! canonical predicate, and commits the decision atomically with the item
//! write. The storage trigger installed by the migrator re-runs the identical
//! check inside the database as defense-in-depth against writers that bypass
//! this layer.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    asset::{self, Entity as AssetEntity},
    invoice_item::{self, Entity as InvoiceItemEntity},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::availability::{availability_for, Availability};
use crate::services::{asset_status, invoices};

/// One line to reserve and append to an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddItemRequest {
    pub asset_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Locks the asset row, recomputes availability under the lock, and decides.
///
/// Races for the last units resolve strictly first-committer-wins: the loser's
/// recheck runs after the winner's commit and fails here, rolling back the
/// enclosing transaction in full. There is no queuing, automatic retry, or
/// partial reservation.
pub async fn check_and_reserve(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
    quantity: i32,
    exclude_invoice_id: Option<Uuid>,
) -> Result<(asset::Model, Availability), ServiceError> {
    let mut select = AssetEntity::find_by_id(asset_id);
    if txn.get_database_backend() == DbBackend::Postgres {
        // Exclusive row lock; no other writer can observe stale availability
        // for this asset until we commit or roll back. Sqlite serializes
        // writers at the connection level instead.
        select = select.lock_exclusive();
    }
    let asset = select
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Asset {} not found", asset_id)))?;

    let snapshot = availability_for(txn, &asset, exclude_invoice_id).await?;
    if snapshot.available < quantity as i64 {
        warn!(
            asset_id = %asset_id,
            requested = quantity,
            available = snapshot.available,
            "Reservation rejected under lock"
        );
        return Err(ServiceError::InsufficientStock {
            asset_id,
            requested: quantity,
            available: snapshot.available,
        });
    }

    Ok((asset, snapshot))
}

/// Service guarding invoice-line reservations.
#[derive(Clone)]
pub struct ReservationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReservationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Adds one or more lines to an invoice, all-or-nothing.
    ///
    /// Requests are sorted by ascending asset id before locking so concurrent
    /// multi-item adds cannot form deadlock cycles. Each line passes the guard
    /// individually; any failure rolls the whole batch back and nothing is
    /// persisted.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn add_items(
        &self,
        invoice_id: Uuid,
        requests: Vec<AddItemRequest>,
    ) -> Result<Vec<invoice_item::Model>, ServiceError> {
        if requests.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one item is required".to_string(),
            ));
        }
        for request in &requests {
            request.validate()?;
        }

        let mut ordered = requests;
        ordered.sort_by_key(|r| r.asset_id);

        let db = &*self.db_pool;
        let inserted = db
            .transaction::<_, Vec<invoice_item::Model>, ServiceError>(|txn| {
                Box::pin(async move {
                    let invoice = invoices::load_invoice_for_update(txn, invoice_id).await?;
                    let status = invoice.status_enum();
                    if !status.is_editable() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Cannot add items to a {} invoice",
                            status.as_str()
                        )));
                    }

                    let mut created = Vec::with_capacity(ordered.len());
                    for request in &ordered {
                        let (asset, _snapshot) =
                            check_and_reserve(txn, request.asset_id, request.quantity, None)
                                .await?;

                        let line_total =
                            asset.unit_price * rust_decimal::Decimal::from(request.quantity);
                        let item = invoice_item::ActiveModel {
                            invoice_id: Set(invoice_id),
                            asset_id: Set(request.asset_id),
                            quantity: Set(request.quantity),
                            unit_price: Set(asset.unit_price),
                            line_total: Set(line_total),
                            ..Default::default()
                        };
                        // The stock trigger re-checks this insert inside the
                        // storage engine; map its abort like any other
                        // insufficient-stock outcome.
                        let item = item.insert(txn).await.map_err(ServiceError::db_error)?;
                        created.push(item);
                    }

                    invoices::recompute_totals(txn, invoice_id).await?;
                    for request in &ordered {
                        asset_status::refresh_asset_status(txn, request.asset_id).await?;
                    }

                    Ok(created)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        for item in &inserted {
            info!(
                invoice_id = %invoice_id,
                asset_id = %item.asset_id,
                quantity = item.quantity,
                "Invoice item reserved"
            );
            self.event_sender
                .send(Event::ItemReserved {
                    invoice_id,
                    asset_id: item.asset_id,
                    quantity: item.quantity,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(inserted)
    }

    /// Convenience wrapper for the single-line case.
    pub async fn add_item(
        &self,
        invoice_id: Uuid,
        asset_id: Uuid,
        quantity: i32,
    ) -> Result<invoice_item::Model, ServiceError> {
        let mut items = self
            .add_items(invoice_id, vec![AddItemRequest { asset_id, quantity }])
            .await?;
        items
            .pop()
            .ok_or_else(|| ServiceError::InternalError("Insert returned no item".to_string()))
    }

    /// Logically removes a line while the invoice is still editable. The row
    /// stays for audit; the predicate stops counting it immediately.
    #[instrument(skip(self))]
    pub async fn void_item(
        &self,
        invoice_id: Uuid,
        item_id: Uuid,
        voided_by: &str,
    ) -> Result<invoice_item::Model, ServiceError> {
        let voided_by = voided_by.to_string();
        let db = &*self.db_pool;
        let voided = db
            .transaction::<_, invoice_item::Model, ServiceError>(|txn| {
                Box::pin(async move {
                    let invoice = invoices::load_invoice_for_update(txn, invoice_id).await?;
                    if !invoice.status_enum().is_editable() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Cannot void items on a {} invoice",
                            invoice.status
                        )));
                    }

                    let item = InvoiceItemEntity::find_by_id(item_id)
                        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Item {} not found on invoice {}",
                                item_id, invoice_id
                            ))
                        })?;
                    if item.is_voided() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Item {} is already voided",
                            item_id
                        )));
                    }

                    let asset_id = item.asset_id;
                    let mut active: invoice_item::ActiveModel = item.into();
                    active.voided_at = Set(Some(chrono::Utc::now()));
                    active.voided_by = Set(Some(voided_by));
                    let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

                    let recomputed = invoices::recompute_totals(txn, invoice_id).await?;

                    // A void must not strand recorded payments above the new
                    // total; amount_paid can never exceed total_amount.
                    let paid = invoices::active_payment_total(txn, invoice_id).await?;
                    if paid > recomputed.total_amount {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Voiding item {} would leave payments ({}) above the invoice total ({})",
                            item_id, paid, recomputed.total_amount
                        )));
                    }
                    invoices::recompute_payment_status(txn, invoice_id).await?;

                    asset_status::refresh_asset_status(txn, asset_id).await?;

                    Ok(updated)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(invoice_id = %invoice_id, item_id = %item_id, "Invoice item voided");
        self.event_sender
            .send(Event::ItemVoided {
                invoice_id,
                item_id,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(voided)
    }
}
