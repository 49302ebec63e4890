//! Returns subsystem
//!
//! An InvoiceReturn accumulates lines while draft, then finalizes in a single
//! transaction: source-item return counters move, on-hand restocks when the
//! condition allows it, and the money side settles as either a refund ledger
//! row or a store credit (exchange).

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    asset::{self, Entity as AssetEntity},
    customer_credit,
    invoice::Entity as InvoiceEntity,
    invoice_item::{self, Entity as InvoiceItemEntity},
    invoice_return::{self, Entity as InvoiceReturnEntity, RestockCondition, ReturnStatus, ReturnType},
    return_item::{self, Entity as ReturnItemEntity},
    transaction::{self, Entity as TransactionEntity, PaymentMethod, TransactionType},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{asset_status, payments};

/// Units of a source item already claimed by other lines: finalized returns
/// are reflected in `quantity_returned_total`; draft lines in this return
/// count too so one draft cannot over-commit a line in two steps.
async fn draft_quantity_for_item(
    txn: &DatabaseTransaction,
    return_id: Uuid,
    invoice_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let lines = ReturnItemEntity::find()
        .filter(return_item::Column::ReturnId.eq(return_id))
        .filter(return_item::Column::InvoiceItemId.eq(invoice_item_id))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(lines.iter().map(|l| l.quantity_returned).sum())
}

/// Refunds go back the way the money came in: the method of the most recent
/// non-voided payment on the invoice, cash when none exists.
async fn refund_method(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<PaymentMethod, ServiceError> {
    let latest = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .filter(transaction::Column::TransactionType.eq(TransactionType::Payment.as_str()))
        .filter(transaction::Column::VoidedAt.is_null())
        .order_by_desc(transaction::Column::CreatedAt)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(latest
        .and_then(|row| PaymentMethod::from_str(&row.payment_method))
        .unwrap_or(PaymentMethod::Cash))
}

/// Service managing the draft → finalized | cancelled return lifecycle.
#[derive(Clone)]
pub struct ReturnService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReturnService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Opens a draft return against an invoice.
    #[instrument(skip(self))]
    pub async fn create_return(
        &self,
        invoice_id: Uuid,
        return_type: ReturnType,
        restock_condition: RestockCondition,
    ) -> Result<invoice_return::Model, ServiceError> {
        let db = &*self.db_pool;
        let invoice = InvoiceEntity::find_by_id(invoice_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

        let created = invoice_return::ActiveModel {
            invoice_id: Set(invoice_id),
            status: Set(ReturnStatus::Draft.as_str().to_string()),
            return_type: Set(return_type.as_str().to_string()),
            restock_condition: Set(restock_condition.as_str().to_string()),
            refund_amount: Set(Decimal::ZERO),
            currency: Set(invoice.currency),
            finalized_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(return_id = %created.id, invoice_id = %invoice_id, "Return drafted");
        Ok(created)
    }

    /// Adds a line to a draft return, bounded by the source item's remaining
    /// returnable quantity (minus what this draft already claims).
    #[instrument(skip(self))]
    pub async fn add_return_item(
        &self,
        return_id: Uuid,
        invoice_item_id: Uuid,
        quantity: i32,
    ) -> Result<return_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Return quantity must be at least 1".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let line = db
            .transaction::<_, return_item::Model, ServiceError>(|txn| {
                Box::pin(async move {
                    let ret = load_return(txn, return_id).await?;
                    require_draft(&ret)?;

                    let item = InvoiceItemEntity::find_by_id(invoice_item_id)
                        .filter(invoice_item::Column::InvoiceId.eq(ret.invoice_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Item {} not found on invoice {}",
                                invoice_item_id, ret.invoice_id
                            ))
                        })?;
                    if item.is_voided() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Item {} is voided and cannot be returned",
                            invoice_item_id
                        )));
                    }

                    let already_drafted =
                        draft_quantity_for_item(txn, return_id, invoice_item_id).await?;
                    let returnable = item.returnable_quantity() - already_drafted;
                    if quantity > returnable {
                        return Err(ServiceError::OverReturnRejected {
                            requested: quantity,
                            returnable: returnable.max(0),
                        });
                    }

                    let line = return_item::ActiveModel {
                        return_id: Set(return_id),
                        invoice_item_id: Set(invoice_item_id),
                        asset_id: Set(item.asset_id),
                        quantity_returned: Set(quantity),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    // Keep the draft's money figure current as lines land.
                    let refund_amount = ret.refund_amount
                        + item.unit_price * Decimal::from(quantity);
                    let mut active: invoice_return::ActiveModel = ret.into();
                    active.refund_amount = Set(refund_amount);
                    active.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok(line)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            return_id = %return_id,
            invoice_item_id = %invoice_item_id,
            quantity = quantity,
            "Return line added"
        );
        Ok(line)
    }

    /// Finalizes a draft return in one transaction: bounds are re-validated
    /// against committed state, `quantity_returned_total` moves on each source
    /// item, on-hand restocks for as_is/needs_testing (withheld for
    /// needs_repair pending the repair workflow), and the money side settles
    /// as a refund ledger row or a store credit depending on the return type.
    #[instrument(skip(self))]
    pub async fn finalize_return(
        &self,
        return_id: Uuid,
    ) -> Result<invoice_return::Model, ServiceError> {
        let db = &*self.db_pool;
        let (finalized, credit_id) = db
            .transaction::<_, (invoice_return::Model, Option<Uuid>), ServiceError>(|txn| {
                Box::pin(async move {
                    let ret = load_return(txn, return_id).await?;
                    require_draft(&ret)?;
                    let return_type = ReturnType::from_str(&ret.return_type)
                        .ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "Unknown return type '{}'",
                                ret.return_type
                            ))
                        })?;
                    let restock_condition = RestockCondition::from_str(&ret.restock_condition)
                        .ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "Unknown restock condition '{}'",
                                ret.restock_condition
                            ))
                        })?;

                    let lines = ReturnItemEntity::find()
                        .filter(return_item::Column::ReturnId.eq(return_id))
                        .all(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    if lines.is_empty() {
                        return Err(ServiceError::ValidationError(
                            "Cannot finalize a return without lines".to_string(),
                        ));
                    }

                    let mut refund_total = Decimal::ZERO;
                    let mut touched_assets = BTreeSet::new();
                    for line in &lines {
                        let item = InvoiceItemEntity::find_by_id(line.invoice_item_id)
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Item {} not found",
                                    line.invoice_item_id
                                ))
                            })?;
                        if line.quantity_returned > item.returnable_quantity() {
                            return Err(ServiceError::OverReturnRejected {
                                requested: line.quantity_returned,
                                returnable: item.returnable_quantity().max(0),
                            });
                        }

                        refund_total += item.unit_price * Decimal::from(line.quantity_returned);

                        let returned_total =
                            item.quantity_returned_total + line.quantity_returned;
                        let mut item_active: invoice_item::ActiveModel = item.into();
                        item_active.quantity_returned_total = Set(returned_total);
                        item_active
                            .update(txn)
                            .await
                            .map_err(ServiceError::db_error)?;

                        if restock_condition.restocks_immediately() {
                            restock(txn, line.asset_id, line.quantity_returned).await?;
                        }
                        touched_assets.insert(line.asset_id);
                    }

                    let invoice_id = ret.invoice_id;
                    let mut credit_id = None;
                    match return_type {
                        ReturnType::Refund => {
                            let method = refund_method(txn, invoice_id).await?;
                            payments::record_in_txn(
                                txn,
                                &payments::RecordTransaction {
                                    invoice_id,
                                    transaction_type: TransactionType::Refund,
                                    amount: refund_total,
                                    payment_method: method,
                                    other_method_note: None,
                                    comment: format!("Refund for return {}", return_id),
                                    return_id: Some(return_id),
                                },
                            )
                            .await?;
                        }
                        ReturnType::Exchange => {
                            let invoice = InvoiceEntity::find_by_id(invoice_id)
                                .one(txn)
                                .await
                                .map_err(ServiceError::db_error)?
                                .ok_or_else(|| {
                                    ServiceError::NotFound(format!(
                                        "Invoice {} not found",
                                        invoice_id
                                    ))
                                })?;
                            let credit = customer_credit::ActiveModel {
                                customer_id: Set(invoice.customer_id),
                                source_return_id: Set(Some(return_id)),
                                original_amount: Set(refund_total),
                                remaining_amount: Set(refund_total),
                                currency: Set(invoice.currency),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await
                            .map_err(ServiceError::db_error)?;
                            credit_id = Some(credit.id);
                        }
                    }

                    let mut active: invoice_return::ActiveModel = ret.into();
                    active.status = Set(ReturnStatus::Finalized.as_str().to_string());
                    active.refund_amount = Set(refund_total);
                    active.finalized_at = Set(Some(chrono::Utc::now()));
                    let finalized = active.update(txn).await.map_err(ServiceError::db_error)?;

                    for asset_id in touched_assets {
                        asset_status::refresh_asset_status(txn, asset_id).await?;
                    }

                    Ok((finalized, credit_id))
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            return_id = %finalized.id,
            invoice_id = %finalized.invoice_id,
            refund_amount = %finalized.refund_amount,
            "Return finalized"
        );
        self.event_sender
            .send(Event::ReturnFinalized {
                return_id: finalized.id,
                invoice_id: finalized.invoice_id,
            })
            .await
            .map_err(ServiceError::EventError)?;
        if let Some(credit_id) = credit_id {
            self.event_sender
                .send(Event::CreditIssued {
                    credit_id,
                    amount: finalized.refund_amount,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(finalized)
    }

    /// Abandons a draft return; nothing was committed, so nothing reverses.
    #[instrument(skip(self))]
    pub async fn cancel_return(
        &self,
        return_id: Uuid,
    ) -> Result<invoice_return::Model, ServiceError> {
        let db = &*self.db_pool;
        let ret = load_return_on(db, return_id).await?;
        require_draft(&ret)?;

        let mut active: invoice_return::ActiveModel = ret.into();
        active.status = Set(ReturnStatus::Cancelled.as_str().to_string());
        let cancelled = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(return_id = %return_id, "Return cancelled");
        Ok(cancelled)
    }

    #[instrument(skip(self))]
    pub async fn get_return(
        &self,
        return_id: Uuid,
    ) -> Result<Option<invoice_return::Model>, ServiceError> {
        InvoiceReturnEntity::find_by_id(return_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

async fn load_return(
    txn: &DatabaseTransaction,
    return_id: Uuid,
) -> Result<invoice_return::Model, ServiceError> {
    load_return_on(txn, return_id).await
}

async fn load_return_on<C: sea_orm::ConnectionTrait>(
    conn: &C,
    return_id: Uuid,
) -> Result<invoice_return::Model, ServiceError> {
    InvoiceReturnEntity::find_by_id(return_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))
}

fn require_draft(ret: &invoice_return::Model) -> Result<(), ServiceError> {
    match ReturnStatus::from_str(&ret.status) {
        Some(ReturnStatus::Draft) => Ok(()),
        _ => Err(ServiceError::InvalidTransition(format!(
            "Return {} is {} and no longer editable",
            ret.id, ret.status
        ))),
    }
}

/// Adds returned units back to on-hand.
async fn restock(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let found = AssetEntity::find_by_id(asset_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Asset {} not found", asset_id)))?;
    let on_hand = found.on_hand + quantity;
    let mut active: asset::ActiveModel = found.into();
    active.on_hand = Set(on_hand);
    active.update(txn).await.map_err(ServiceError::db_error)?;
    Ok(())
}
