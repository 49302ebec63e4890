//! The storage trigger must hold the reservation invariant even for writers
//! that go straight to the tables, skipping the service-layer guard.

mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use stockledger::entities::invoice_item::{self, Entity as InvoiceItemEntity};
use stockledger::errors::map_db_err;
use stockledger::services::availability::compute_availability;

#[tokio::test]
async fn raw_insert_past_on_hand_is_aborted_by_the_trigger() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("GUARD-1", 2, dec!(10.00)).await;
    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();

    // Rogue write: no lock, no recheck, three units against two on hand.
    let err = invoice_item::ActiveModel {
        invoice_id: Set(invoice.id),
        asset_id: Set(asset.id),
        quantity: Set(3),
        unit_price: Set(dec!(10.00)),
        line_total: Set(dec!(30.00)),
        ..Default::default()
    }
    .insert(app.db())
    .await
    .unwrap_err();

    assert_eq!(map_db_err(err).code(), "INSUFFICIENT_STOCK");

    // Nothing persisted; availability is untouched.
    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.reserved, 0);
    assert_eq!(snapshot.available, 2);
}

#[tokio::test]
async fn raw_insert_within_bounds_passes_the_trigger() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("GUARD-2", 2, dec!(10.00)).await;
    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(Uuid::new_v4(), "USD")
        .await
        .unwrap();

    invoice_item::ActiveModel {
        invoice_id: Set(invoice.id),
        asset_id: Set(asset.id),
        quantity: Set(2),
        unit_price: Set(dec!(10.00)),
        line_total: Set(dec!(20.00)),
        ..Default::default()
    }
    .insert(app.db())
    .await
    .expect("within-bounds insert passes");

    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.reserved, 2);
    assert_eq!(snapshot.available, 0);
}

#[tokio::test]
async fn raw_quantity_bump_past_on_hand_is_aborted_by_the_trigger() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("GUARD-3", 3, dec!(10.00)).await;
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
        .add_item(invoice.id, asset.id, 2)
        .await
        .unwrap();

    let mut rogue: invoice_item::ActiveModel = item.into();
    rogue.quantity = Set(4);
    let err = rogue.update(app.db()).await.unwrap_err();
    assert_eq!(map_db_err(err).code(), "INSUFFICIENT_STOCK");

    let untouched = InvoiceItemEntity::find()
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.quantity, 2);
}
