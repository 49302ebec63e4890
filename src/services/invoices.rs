//! Invoice State Machine
//!
//! unpaid → partially_paid → paid, with a cancelled terminal branch reachable
//! only while no active payment exists. Status is always recomputed from the
//! transaction ledger, never flipped directly by callers; the paid transition
//! is the single place on-hand is consumed and it is gated so re-evaluation
//! can never double-decrement.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    invoice::{self, Entity as InvoiceEntity, InvoiceStatus},
    invoice_item::{self, Entity as InvoiceItemEntity},
    transaction::{self, Entity as TransactionEntity},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::asset_status;

/// Loads an invoice, taking an exclusive row lock where the backend supports
/// it (sqlite serializes writers at the connection instead).
pub(crate) async fn load_invoice_for_update(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    let mut select = InvoiceEntity::find_by_id(invoice_id);
    if txn.get_database_backend() == DbBackend::Postgres {
        select = select.lock_exclusive();
    }
    select
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))
}

/// Sum of non-voided line totals.
pub(crate) async fn active_item_total<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let items = InvoiceItemEntity::find()
        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
        .filter(invoice_item::Column::VoidedAt.is_null())
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(items.iter().map(|i| i.line_total).sum())
}

/// Signed sum of non-voided ledger rows.
pub(crate) async fn active_payment_total<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let rows = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows.iter().map(|t| t.signed_amount()).sum())
}

/// Sum of non-voided payment rows only (refunds ignored). Decides whether a
/// paid invoice stays paid: refunds issued by returns pay money out without
/// un-selling the invoice, while voiding a qualifying payment demotes it.
pub(crate) async fn active_gross_payment_total<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    use crate::entities::transaction::TransactionType;
    let rows = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .filter(transaction::Column::VoidedAt.is_null())
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows
        .iter()
        .filter(|t| {
            TransactionType::from_str(&t.transaction_type) == Some(TransactionType::Payment)
        })
        .map(|t| t.amount)
        .sum())
}

fn status_for(amount_paid: Decimal, total_amount: Decimal) -> InvoiceStatus {
    if amount_paid > Decimal::ZERO && amount_paid >= total_amount {
        InvoiceStatus::Paid
    } else if amount_paid > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Unpaid
    }
}

/// Recomputes `total_amount`/`balance_due` from non-voided lines. Used after
/// item adds and voids.
pub(crate) async fn recompute_totals(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    let invoice = load_invoice_for_update(txn, invoice_id).await?;
    let total = active_item_total(txn, invoice_id).await?;
    let amount_paid = invoice.amount_paid;
    let version = invoice.version;

    let mut active: invoice::ActiveModel = invoice.into();
    active.total_amount = Set(total);
    active.balance_due = Set(total - amount_paid);
    active.version = Set(version + 1);
    active.update(txn).await.map_err(ServiceError::db_error)
}

/// Recomputes `amount_paid` and status from the ledger, applying the
/// transition side effects on the way:
///
/// - entering paid decrements each non-voided line's asset on-hand by the
///   line's net quantity, exactly once;
/// - leaving paid (a qualifying payment was voided) restores it symmetrically,
///   so availability keeps satisfying `available = on_hand − reserved`.
///
/// Returns the updated invoice plus the asset ids whose facts changed.
pub(crate) async fn recompute_payment_status(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<(invoice::Model, Vec<Uuid>), ServiceError> {
    let invoice = load_invoice_for_update(txn, invoice_id).await?;
    let old_status = invoice.status_enum();
    if old_status == InvoiceStatus::Cancelled {
        return Ok((invoice, Vec::new()));
    }

    let amount_paid = active_payment_total(txn, invoice_id).await?;
    let new_status = if old_status == InvoiceStatus::Paid {
        // Paid is sticky against refunds: only the loss of a qualifying
        // payment (a void) demotes, otherwise a finalized refund-return would
        // un-sell goods the customer still holds.
        let gross_payments = active_gross_payment_total(txn, invoice_id).await?;
        if gross_payments >= invoice.total_amount && invoice.total_amount > Decimal::ZERO {
            InvoiceStatus::Paid
        } else {
            status_for(amount_paid, invoice.total_amount)
        }
    } else {
        status_for(amount_paid, invoice.total_amount)
    };

    let mut touched_assets = Vec::new();
    if old_status != InvoiceStatus::Paid && new_status == InvoiceStatus::Paid {
        touched_assets = shift_on_hand(txn, invoice_id, -1).await?;
    } else if old_status == InvoiceStatus::Paid && new_status != InvoiceStatus::Paid {
        touched_assets = shift_on_hand(txn, invoice_id, 1).await?;
    }

    let total_amount = invoice.total_amount;
    let version = invoice.version;
    let mut active: invoice::ActiveModel = invoice.into();
    active.amount_paid = Set(amount_paid);
    active.balance_due = Set(total_amount - amount_paid);
    active.status = Set(new_status.as_str().to_string());
    active.version = Set(version + 1);
    let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

    if old_status != new_status {
        info!(
            invoice_id = %invoice_id,
            old_status = %old_status.as_str(),
            new_status = %new_status.as_str(),
            amount_paid = %amount_paid,
            "Invoice status recomputed"
        );
    }

    for asset_id in &touched_assets {
        asset_status::refresh_asset_status(txn, *asset_id).await?;
    }

    Ok((updated, touched_assets))
}

/// Applies `direction * net_quantity` of every non-voided line to its asset's
/// on-hand. Direction is -1 entering paid, +1 leaving it.
async fn shift_on_hand(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
    direction: i32,
) -> Result<Vec<Uuid>, ServiceError> {
    use crate::entities::asset::{self, Entity as AssetEntity};

    let items = InvoiceItemEntity::find()
        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
        .filter(invoice_item::Column::VoidedAt.is_null())
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut touched = BTreeSet::new();
    for item in items {
        let net = item.quantity - item.quantity_returned_total;
        if net == 0 {
            continue;
        }
        let asset = AssetEntity::find_by_id(item.asset_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Asset {} not found", item.asset_id))
            })?;
        let on_hand = asset.on_hand + direction * net;
        let mut active: asset::ActiveModel = asset.into();
        active.on_hand = Set(on_hand);
        active.update(txn).await.map_err(ServiceError::db_error)?;
        touched.insert(item.asset_id);
    }
    Ok(touched.into_iter().collect())
}

/// Service driving invoice lifecycle operations.
#[derive(Clone)]
pub struct InvoiceService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InvoiceService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a new invoice in the unpaid state with zero totals.
    #[instrument(skip(self))]
    pub async fn create_invoice(
        &self,
        customer_id: Uuid,
        currency: &str,
    ) -> Result<invoice::Model, ServiceError> {
        let id = Uuid::new_v4();
        let number = format!("INV-{}", &id.simple().to_string()[..8].to_uppercase());
        let model = invoice::ActiveModel {
            id: Set(id),
            invoice_number: Set(number),
            customer_id: Set(customer_id),
            status: Set(InvoiceStatus::Unpaid.as_str().to_string()),
            currency: Set(currency.to_string()),
            total_amount: Set(Decimal::ZERO),
            amount_paid: Set(Decimal::ZERO),
            balance_due: Set(Decimal::ZERO),
            cancelled_at: Set(None),
            ..Default::default()
        };
        let created = model
            .insert(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        info!(invoice_id = %created.id, invoice_number = %created.invoice_number, "Invoice created");
        self.event_sender
            .send(Event::InvoiceCreated {
                invoice_id: created.id,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<invoice::Model>, ServiceError> {
        InvoiceEntity::find_by_id(invoice_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Cancels an invoice. Only unpaid/partially-paid invoices with a zero
    /// active payment sum are cancellable; outstanding payments must be voided
    /// or refunded first. No explicit unreserve happens: the canonical
    /// predicate excludes cancelled invoices from every future reservation sum.
    #[instrument(skip(self))]
    pub async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<invoice::Model, ServiceError> {
        let db = &*self.db_pool;
        let (cancelled, released_assets) = db
            .transaction::<_, (invoice::Model, Vec<Uuid>), ServiceError>(|txn| {
                Box::pin(async move {
                    let invoice = load_invoice_for_update(txn, invoice_id).await?;
                    let status = invoice.status_enum();
                    if status.is_terminal() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Invoice {} is {} and cannot be cancelled",
                            invoice_id,
                            status.as_str()
                        )));
                    }
                    let amount_paid = active_payment_total(txn, invoice_id).await?;
                    if amount_paid != Decimal::ZERO {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Invoice {} has active payments totalling {}; void or refund them before cancelling",
                            invoice_id, amount_paid
                        )));
                    }

                    let items = InvoiceItemEntity::find()
                        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
                        .filter(invoice_item::Column::VoidedAt.is_null())
                        .all(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    let released: BTreeSet<Uuid> = items.iter().map(|i| i.asset_id).collect();

                    let version = invoice.version;
                    let mut active: invoice::ActiveModel = invoice.into();
                    active.status = Set(InvoiceStatus::Cancelled.as_str().to_string());
                    active.cancelled_at = Set(Some(chrono::Utc::now()));
                    active.version = Set(version + 1);
                    let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

                    // The cancelled invoice no longer matches the predicate,
                    // so its assets' reservations are released as of this
                    // commit; re-derive their display status.
                    for asset_id in &released {
                        asset_status::refresh_asset_status(txn, *asset_id).await?;
                    }

                    Ok((updated, released.into_iter().collect()))
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            invoice_id = %invoice_id,
            released_assets = released_assets.len(),
            "Invoice cancelled"
        );
        self.event_sender
            .send(Event::InvoiceCancelled { invoice_id })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_follows_payment_bounds() {
        assert_eq!(status_for(dec!(0), dec!(100)), InvoiceStatus::Unpaid);
        assert_eq!(status_for(dec!(40), dec!(100)), InvoiceStatus::PartiallyPaid);
        assert_eq!(status_for(dec!(100), dec!(100)), InvoiceStatus::Paid);
    }

    #[test]
    fn refund_below_zero_reads_as_unpaid() {
        assert_eq!(status_for(dec!(-10), dec!(100)), InvoiceStatus::Unpaid);
    }

    #[test]
    fn zero_total_invoice_stays_unpaid_without_payments() {
        assert_eq!(status_for(dec!(0), dec!(0)), InvoiceStatus::Unpaid);
    }
}
