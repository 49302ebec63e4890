mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use stockledger::entities::invoice::InvoiceStatus;
use stockledger::entities::invoice_item::Entity as InvoiceItemEntity;
use stockledger::entities::invoice_return::{RestockCondition, ReturnStatus, ReturnType};
use stockledger::entities::transaction::{
    self, Entity as TransactionEntity, PaymentMethod, TransactionType,
};
use stockledger::errors::ServiceError;
use stockledger::services::payments::RecordTransaction;

/// Seeds an asset, sells `quantity` of it on a fully paid invoice, and hands
/// back the ids the return tests start from.
async fn sell_paid(
    app: &TestApp,
    on_hand: i32,
    quantity: i32,
    unit_price: rust_decimal::Decimal,
) -> (Uuid, Uuid, Uuid) {
    let asset = app.seed_asset("RET-SKU", on_hand, unit_price).await;
    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();
    let item = app
        .state
        .services
        .reservations
        .add_item(invoice.id, asset.id, quantity)
        .await
        .unwrap();
    app.state
        .services
        .payments
        .record_transaction(RecordTransaction {
            invoice_id: invoice.id,
            transaction_type: TransactionType::Payment,
            amount: unit_price * rust_decimal::Decimal::from(quantity),
            payment_method: PaymentMethod::Card,
            other_method_note: None,
            comment: "sale".to_string(),
            return_id: None,
        })
        .await
        .unwrap();
    (asset.id, invoice.id, item.id)
}

#[tokio::test]
async fn refund_return_restocks_and_appends_a_linked_refund_row() {
    let app = TestApp::new().await;
    let (asset_id, invoice_id, item_id) = sell_paid(&app, 5, 2, dec!(100.00)).await;
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 3);

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 1)
        .await
        .unwrap();
    let finalized = app
        .state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap();

    assert_eq!(finalized.status, ReturnStatus::Finalized.as_str());
    assert_eq!(finalized.refund_amount, dec!(100.00));
    assert!(finalized.finalized_at.is_some());

    // One unit back on the shelf, the source line's counter moved.
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 4);
    let item = InvoiceItemEntity::find_by_id(item_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.quantity_returned_total, 1);

    // The money left through the ledger, via a refund row tied to the return.
    let refunds = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .filter(transaction::Column::ReturnId.eq(ret.id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].transaction_type, TransactionType::Refund.as_str());
    assert_eq!(refunds[0].amount, dec!(100.00));
    // The money goes back on the card it came in on.
    assert_eq!(refunds[0].payment_method, PaymentMethod::Card.as_str());

    // A refund does not un-sell the invoice; only a payment void demotes it.
    let invoice = app.reload_invoice(invoice_id).await;
    assert_eq!(invoice.status_enum(), InvoiceStatus::Paid);
    assert_eq!(invoice.amount_paid, dec!(100.00));
}

#[tokio::test]
async fn over_return_is_rejected_at_draft_time() {
    let app = TestApp::new().await;
    let (_, invoice_id, item_id) = sell_paid(&app, 5, 2, dec!(10.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    let err = app
        .state
        .services
        .returns
        .add_return_item(ret.id, item_id, 3)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::OverReturnRejected {
            requested: 3,
            returnable: 2
        }
    );
}

#[tokio::test]
async fn one_draft_cannot_claim_a_line_twice_past_its_quantity() {
    let app = TestApp::new().await;
    let (_, invoice_id, item_id) = sell_paid(&app, 5, 2, dec!(10.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 1)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 1)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .returns
        .add_return_item(ret.id, item_id, 1)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::OverReturnRejected {
            requested: 1,
            returnable: 0
        }
    );
}

#[tokio::test]
async fn needs_repair_withholds_restock() {
    let app = TestApp::new().await;
    let (asset_id, invoice_id, item_id) = sell_paid(&app, 3, 1, dec!(20.00)).await;
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 2);

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::NeedsRepair)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 1)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap();

    // The unit came back broken; it does not rejoin sellable stock.
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 2);
}

#[tokio::test]
async fn cancelled_draft_changes_nothing_and_locks_the_return() {
    let app = TestApp::new().await;
    let (asset_id, invoice_id, item_id) = sell_paid(&app, 3, 2, dec!(15.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 2)
        .await
        .unwrap();
    let cancelled = app
        .state
        .services
        .returns
        .cancel_return(ret.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReturnStatus::Cancelled.as_str());

    assert_eq!(app.reload_asset(asset_id).await.on_hand, 1);
    let item = InvoiceItemEntity::find_by_id(item_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.quantity_returned_total, 0);

    let err = app
        .state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn empty_return_cannot_finalize() {
    let app = TestApp::new().await;
    let (_, invoice_id, _) = sell_paid(&app, 3, 1, dec!(5.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    let err = app
        .state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn exchange_return_issues_store_credit_instead_of_a_refund() {
    let app = TestApp::new().await;
    let (_, invoice_id, item_id) = sell_paid(&app, 5, 2, dec!(50.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Exchange, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 2)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap();

    // No refund row lands on the invoice for exchanges.
    let refunds = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .filter(transaction::Column::ReturnId.eq(ret.id))
        .all(app.db())
        .await
        .unwrap();
    assert!(refunds.is_empty());

    let credits = stockledger::entities::customer_credit::Entity::find()
        .filter(
            stockledger::entities::customer_credit::Column::SourceReturnId.eq(ret.id),
        )
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].original_amount, dec!(100.00));
    assert_eq!(credits[0].remaining_amount, dec!(100.00));
}

#[tokio::test]
async fn store_credit_applies_as_a_payment_and_voids_back() {
    let app = TestApp::new().await;
    let (_, invoice_id, item_id) = sell_paid(&app, 5, 2, dec!(50.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Exchange, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 2)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap();
    let credit = stockledger::entities::customer_credit::Entity::find()
        .filter(
            stockledger::entities::customer_credit::Column::SourceReturnId.eq(ret.id),
        )
        .one(app.db())
        .await
        .unwrap()
        .unwrap();

    // Spend part of the credit on a fresh invoice.
    let asset = app.seed_asset("NEXT-SKU", 4, dec!(30.00)).await;
    let next_invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(next_invoice.id, asset.id, 1)
        .await
        .unwrap();

    let application = app
        .state
        .services
        .credits
        .apply_credit(credit.id, next_invoice.id, dec!(30.00))
        .await
        .unwrap();
    assert_eq!(application.amount, dec!(30.00));

    let credit_after = app
        .state
        .services
        .credits
        .get_credit(credit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit_after.remaining_amount, dec!(70.00));

    let invoice_after = app.reload_invoice(next_invoice.id).await;
    assert_eq!(invoice_after.status_enum(), InvoiceStatus::Paid);
    let payment = TransactionEntity::find_by_id(application.transaction_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.payment_method, PaymentMethod::StoreCredit.as_str());

    // Applying more than remains is refused.
    let err = app
        .state
        .services
        .credits
        .apply_credit(credit.id, next_invoice.id, dec!(70.01))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // Voiding the application restores the remainder and demotes the invoice.
    app.state
        .services
        .credits
        .void_application(application.id, "manager")
        .await
        .unwrap();
    let credit_restored = app
        .state
        .services
        .credits
        .get_credit(credit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit_restored.remaining_amount, dec!(100.00));
    assert_eq!(
        app.reload_invoice(next_invoice.id).await.status_enum(),
        InvoiceStatus::Unpaid
    );

    let err = app
        .state
        .services
        .credits
        .void_application(application.id, "manager")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn credit_in_another_currency_is_refused() {
    let app = TestApp::new().await;
    let credit = stockledger::entities::customer_credit::ActiveModel {
        customer_id: sea_orm::Set(Uuid::new_v4()),
        original_amount: sea_orm::Set(dec!(100.00)),
        remaining_amount: sea_orm::Set(dec!(100.00)),
        currency: sea_orm::Set("EUR".to_string()),
        ..Default::default()
    }
    .insert(app.db())
    .await
    .unwrap();

    let asset = app.seed_asset("FX-SKU", 2, dec!(30.00)).await;
    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 1)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .credits
        .apply_credit(credit.id, invoice.id, dec!(10.00))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let untouched = app
        .state
        .services
        .credits
        .get_credit(credit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.remaining_amount, dec!(100.00));
    assert_eq!(app.reload_invoice(invoice.id).await.amount_paid, dec!(0));
}

#[tokio::test]
async fn voided_line_cannot_be_returned() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("VOID-SKU", 5, dec!(10.00)).await;
    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();
    let item = app
        .state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 1)
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .void_item(invoice.id, item.id, "clerk")
        .await
        .unwrap();

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice.id, ReturnType::Refund, RestockCondition::AsIs)
        .await
        .unwrap();
    let err = app
        .state
        .services
        .returns
        .add_return_item(ret.id, item.id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn fully_returned_invoice_sells_net_zero_when_payment_is_voided_and_repaid() {
    // A paid invoice whose lines were fully returned has net quantity zero;
    // re-entering paid after a void/repay cycle must not move stock at all.
    let app = TestApp::new().await;
    let (asset_id, invoice_id, item_id) = sell_paid(&app, 4, 2, dec!(25.00)).await;

    let ret = app
        .state
        .services
        .returns
        .create_return(invoice_id, ReturnType::Exchange, RestockCondition::AsIs)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .add_return_item(ret.id, item_id, 2)
        .await
        .unwrap();
    app.state
        .services
        .returns
        .finalize_return(ret.id)
        .await
        .unwrap();

    // Sold 2, restocked 2.
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 4);

    let payment = TransactionEntity::find()
        .filter(transaction::Column::InvoiceId.eq(invoice_id))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    app.state
        .services
        .payments
        .void_transaction(payment.id, "manager", "reissue")
        .await
        .unwrap();

    // Leaving paid restores net quantity, which is zero here.
    assert_eq!(app.reload_asset(asset_id).await.on_hand, 4);
}
