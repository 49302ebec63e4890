//! Payment/Transaction Ledger
//!
//! Append-only: rows carry a positive amount whose effective sign comes from
//! the transaction type, and voiding is logical (timestamp + actor + reason),
//! never deletion. Validation runs before any write; recording and the status
//! recompute commit in one transaction.

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    invoice::{self, InvoiceStatus},
    transaction::{self, Entity as TransactionEntity, PaymentMethod, TransactionType},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::invoices;

/// Request to append one ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub invoice_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Required free-text specification when the method is `Other`.
    pub other_method_note: Option<String>,
    pub comment: String,
    /// Return that produced this row, if any (refund-returns).
    pub return_id: Option<Uuid>,
}

impl RecordTransaction {
    /// Pre-persistence validation: positive amount, non-empty comment,
    /// and a note whenever the method is `Other`.
    fn validate(&self) -> Result<(), ServiceError> {
        if self.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Transaction amount must be positive".to_string(),
            ));
        }
        if self.comment.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Transaction comment must not be empty".to_string(),
            ));
        }
        if self.payment_method == PaymentMethod::Other
            && self
                .other_method_note
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(ServiceError::ValidationError(
                "Payment method 'other' requires a specification note".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ledger append inside an already-open transaction. Shared by the payment
/// service and the store-credit application path, which must decrement the
/// credit remainder atomically with the payment row.
pub(crate) async fn record_in_txn(
    txn: &sea_orm::DatabaseTransaction,
    request: &RecordTransaction,
) -> Result<(transaction::Model, invoice::Model), ServiceError> {
    let invoice = invoices::load_invoice_for_update(txn, request.invoice_id).await?;
    if invoice.status_enum() == InvoiceStatus::Cancelled {
        return Err(ServiceError::InvalidTransition(format!(
            "Invoice {} is cancelled and accepts no transactions",
            request.invoice_id
        )));
    }

    if request.transaction_type == TransactionType::Payment {
        let paid = invoices::active_payment_total(txn, request.invoice_id).await?;
        let attempted = paid + request.amount;
        if attempted > invoice.total_amount {
            return Err(ServiceError::OverpaymentRejected {
                attempted,
                total: invoice.total_amount,
            });
        }
    }

    let row = transaction::ActiveModel {
        invoice_id: Set(request.invoice_id),
        transaction_type: Set(request.transaction_type.as_str().to_string()),
        amount: Set(request.amount),
        currency: Set(invoice.currency.clone()),
        payment_method: Set(request.payment_method.as_str().to_string()),
        other_method_note: Set(request.other_method_note.clone()),
        comment: Set(request.comment.clone()),
        return_id: Set(request.return_id),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let (updated, _touched) = invoices::recompute_payment_status(txn, request.invoice_id).await?;

    Ok((row, updated))
}

/// Void inside an already-open transaction; shared with application voids.
pub(crate) async fn void_in_txn(
    txn: &sea_orm::DatabaseTransaction,
    transaction_id: Uuid,
    voided_by: String,
    reason: String,
) -> Result<(transaction::Model, invoice::Model), ServiceError> {
    let row = TransactionEntity::find_by_id(transaction_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Transaction {} not found", transaction_id))
        })?;
    if row.is_voided() {
        return Err(ServiceError::InvalidTransition(format!(
            "Transaction {} is already voided",
            transaction_id
        )));
    }

    let invoice_id = row.invoice_id;
    let mut active: transaction::ActiveModel = row.into();
    active.voided_at = Set(Some(chrono::Utc::now()));
    active.voided_by = Set(Some(voided_by));
    active.void_reason = Set(Some(reason));
    let voided = active.update(txn).await.map_err(ServiceError::db_error)?;

    let (updated, _touched) = invoices::recompute_payment_status(txn, invoice_id).await?;

    Ok((voided, updated))
}

/// Service appending to and voiding rows in the payment ledger.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Appends a payment or refund and recomputes the invoice status in the
    /// same transaction. A payment that would push `amount_paid` past
    /// `total_amount` is rejected with `OverpaymentRejected` before the write.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id))]
    pub async fn record_transaction(
        &self,
        request: RecordTransaction,
    ) -> Result<(transaction::Model, invoice::Model), ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let (row, updated_invoice) = db
            .transaction::<_, (transaction::Model, invoice::Model), ServiceError>(|txn| {
                Box::pin(async move { record_in_txn(txn, &request).await })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            transaction_id = %row.id,
            invoice_id = %row.invoice_id,
            transaction_type = %row.transaction_type,
            amount = %row.amount,
            new_status = %updated_invoice.status,
            "Ledger row recorded"
        );
        self.event_sender
            .send(Event::TransactionRecorded {
                transaction_id: row.id,
                invoice_id: row.invoice_id,
                amount: row.amount,
            })
            .await
            .map_err(ServiceError::EventError)?;
        if updated_invoice.status_enum() == InvoiceStatus::Paid {
            self.event_sender
                .send(Event::InvoicePaid {
                    invoice_id: updated_invoice.id,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok((row, updated_invoice))
    }

    /// Logically voids a ledger row and recomputes the invoice status
    /// downward; a paid invoice whose qualifying payment is voided drops back
    /// to partially-paid or unpaid, restoring the paid-transition on-hand
    /// decrement on the way.
    #[instrument(skip(self))]
    pub async fn void_transaction(
        &self,
        transaction_id: Uuid,
        voided_by: &str,
        reason: &str,
    ) -> Result<(transaction::Model, invoice::Model), ServiceError> {
        let voided_by = voided_by.to_string();
        let reason = reason.to_string();
        let db = &*self.db_pool;
        let (row, updated_invoice) = db
            .transaction::<_, (transaction::Model, invoice::Model), ServiceError>(|txn| {
                Box::pin(async move { void_in_txn(txn, transaction_id, voided_by, reason).await })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            transaction_id = %row.id,
            invoice_id = %row.invoice_id,
            new_status = %updated_invoice.status,
            "Ledger row voided"
        );
        self.event_sender
            .send(Event::TransactionVoided {
                transaction_id: row.id,
                invoice_id: row.invoice_id,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok((row, updated_invoice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_request() -> RecordTransaction {
        RecordTransaction {
            invoice_id: Uuid::new_v4(),
            transaction_type: TransactionType::Payment,
            amount: dec!(10.00),
            payment_method: PaymentMethod::Cash,
            other_method_note: None,
            comment: "paid at counter".to_string(),
            return_id: None,
        }
    }

    #[test]
    fn rejects_non_positive_amount() {
        let mut request = base_request();
        request.amount = dec!(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_blank_comment() {
        let mut request = base_request();
        request.comment = "   ".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn other_method_requires_note() {
        let mut request = base_request();
        request.payment_method = PaymentMethod::Other;
        assert!(request.validate().is_err());
        request.other_method_note = Some("gift voucher".to_string());
        assert!(request.validate().is_ok());
    }
}
