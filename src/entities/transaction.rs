use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Payment,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(TransactionType::Payment),
            "refund" => Some(TransactionType::Refund),
            _ => None,
        }
    }
}

/// Closed set of accepted payment methods. `Other` requires a free-text
/// specification on the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    StoreCredit,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::StoreCredit => "store_credit",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "store_credit" => Some(PaymentMethod::StoreCredit),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

/// Append-only payment/refund ledger row.
///
/// `amount` is always positive; the effective sign comes from
/// `transaction_type`, and a voided row contributes nothing (it is excluded
/// from sums, not negated). Rows are never physically deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub transaction_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub other_method_note: Option<String>,
    pub comment: String,
    /// Set when a finalized return produced this row (refunds) or when a void
    /// was driven by a return.
    pub return_id: Option<Uuid>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<String>,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn is_voided(&self) -> bool {
        self.voided_at.is_some()
    }

    /// Signed contribution to `amount_paid`: `+amount` for payments,
    /// `-amount` for refunds, zero once voided.
    pub fn signed_amount(&self) -> Decimal {
        if self.is_voided() {
            return Decimal::ZERO;
        }
        match TransactionType::from_str(&self.transaction_type) {
            Some(TransactionType::Payment) => self.amount,
            Some(TransactionType::Refund) => -self.amount,
            None => Decimal::ZERO,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }

        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(transaction_type: TransactionType, voided: bool) -> Model {
        Model {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            transaction_type: transaction_type.as_str().to_string(),
            amount: dec!(25.00),
            currency: "USD".to_string(),
            payment_method: PaymentMethod::Cash.as_str().to_string(),
            other_method_note: None,
            comment: "test".to_string(),
            return_id: None,
            voided_at: voided.then(Utc::now),
            voided_by: None,
            void_reason: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn signed_amount_follows_type_and_void_state() {
        assert_eq!(row(TransactionType::Payment, false).signed_amount(), dec!(25.00));
        assert_eq!(row(TransactionType::Refund, false).signed_amount(), dec!(-25.00));
        assert_eq!(row(TransactionType::Payment, true).signed_amount(), Decimal::ZERO);
        assert_eq!(row(TransactionType::Refund, true).signed_amount(), Decimal::ZERO);
    }
}
