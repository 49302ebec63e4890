//! Store credit application
//!
//! Credits are issued by exchange-type returns; applications consume them
//! against future invoices. Each application records a store-credit payment
//! row on the target invoice atomically with the remainder decrement, so the
//! invoice-side invariants (overpayment, status recompute) govern credit money
//! the same as cash.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait, QuerySelect,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    credit_application::{self, Entity as CreditApplicationEntity},
    customer_credit::{self, Entity as CustomerCreditEntity},
    transaction::{PaymentMethod, TransactionType},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{invoices, payments};

/// Service applying and voiding store-credit consumption.
#[derive(Clone)]
pub struct CreditService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl CreditService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_credit(
        &self,
        credit_id: Uuid,
    ) -> Result<Option<customer_credit::Model>, ServiceError> {
        CustomerCreditEntity::find_by_id(credit_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Applies part of a credit to an invoice. The credit row is locked so no
    /// interleaving of applications and voids can drive `remaining_amount`
    /// negative; the linked store-credit payment row lands in the same
    /// transaction and passes the usual overpayment check.
    #[instrument(skip(self))]
    pub async fn apply_credit(
        &self,
        credit_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> Result<credit_application::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Credit application amount must be positive".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let application = db
            .transaction::<_, credit_application::Model, ServiceError>(|txn| {
                Box::pin(async move {
                    let credit = load_credit_for_update(txn, credit_id).await?;
                    let invoice = invoices::load_invoice_for_update(txn, invoice_id).await?;
                    if credit.currency != invoice.currency {
                        return Err(ServiceError::ValidationError(format!(
                            "Credit {} is denominated in {}; invoice {} is in {}",
                            credit_id, credit.currency, invoice_id, invoice.currency
                        )));
                    }
                    if amount > credit.remaining_amount {
                        return Err(ServiceError::ValidationError(format!(
                            "Credit {} has {} remaining; cannot apply {}",
                            credit_id, credit.remaining_amount, amount
                        )));
                    }

                    let (payment_row, _invoice) = payments::record_in_txn(
                        txn,
                        &payments::RecordTransaction {
                            invoice_id,
                            transaction_type: TransactionType::Payment,
                            amount,
                            payment_method: PaymentMethod::StoreCredit,
                            other_method_note: None,
                            comment: format!("Store credit {} applied", credit_id),
                            return_id: None,
                        },
                    )
                    .await?;

                    let remaining = credit.remaining_amount - amount;
                    let mut credit_active: customer_credit::ActiveModel = credit.into();
                    credit_active.remaining_amount = Set(remaining);
                    credit_active
                        .update(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    credit_application::ActiveModel {
                        credit_id: Set(credit_id),
                        invoice_id: Set(invoice_id),
                        transaction_id: Set(payment_row.id),
                        amount: Set(amount),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(
            application_id = %application.id,
            credit_id = %credit_id,
            invoice_id = %invoice_id,
            amount = %amount,
            "Store credit applied"
        );
        self.event_sender
            .send(Event::CreditApplied {
                credit_id,
                invoice_id,
                amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(application)
    }

    /// Voids one application independently: restores the credit remainder and
    /// voids the linked payment row (which recomputes the invoice downward if
    /// it was the qualifying payment).
    #[instrument(skip(self))]
    pub async fn void_application(
        &self,
        application_id: Uuid,
        voided_by: &str,
    ) -> Result<credit_application::Model, ServiceError> {
        let voided_by = voided_by.to_string();
        let db = &*self.db_pool;
        let voided = db
            .transaction::<_, credit_application::Model, ServiceError>(|txn| {
                Box::pin(async move {
                    let application = CreditApplicationEntity::find_by_id(application_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Credit application {} not found",
                                application_id
                            ))
                        })?;
                    if application.is_voided() {
                        return Err(ServiceError::InvalidTransition(format!(
                            "Credit application {} is already voided",
                            application_id
                        )));
                    }

                    let credit = load_credit_for_update(txn, application.credit_id).await?;
                    let remaining = credit.remaining_amount + application.amount;
                    let mut credit_active: customer_credit::ActiveModel = credit.into();
                    credit_active.remaining_amount = Set(remaining);
                    credit_active
                        .update(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    payments::void_in_txn(
                        txn,
                        application.transaction_id,
                        voided_by.clone(),
                        format!("Credit application {} voided", application_id),
                    )
                    .await?;

                    let mut active: credit_application::ActiveModel = application.into();
                    active.voided_at = Set(Some(chrono::Utc::now()));
                    active.voided_by = Set(Some(voided_by));
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(application_id = %application_id, "Credit application voided");
        Ok(voided)
    }
}

async fn load_credit_for_update(
    txn: &DatabaseTransaction,
    credit_id: Uuid,
) -> Result<customer_credit::Model, ServiceError> {
    let mut select = CustomerCreditEntity::find_by_id(credit_id);
    if txn.get_database_backend() == DbBackend::Postgres {
        select = select.lock_exclusive();
    }
    select
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Credit {} not found", credit_id)))
}
