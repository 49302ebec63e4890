mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use stockledger::services::availability::{bulk_compute_availability, compute_availability};

#[tokio::test]
async fn reservation_reduces_available_without_touching_on_hand() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("CAM-001", 10, dec!(250.00)).await;

    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 4)
        .await
        .unwrap();

    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.on_hand, 10);
    assert_eq!(snapshot.reserved, 4);
    assert_eq!(snapshot.available, 6);
    assert_eq!(app.reload_asset(asset.id).await.on_hand, 10);
}

#[tokio::test]
async fn voided_item_frees_its_reservation() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("CAM-002", 5, dec!(99.00)).await;

    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    let item = app
        .state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 3)
        .await
        .unwrap();

    app.state
        .services
        .reservations
        .void_item(invoice.id, item.id, "clerk")
        .await
        .unwrap();

    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.reserved, 0);
    assert_eq!(snapshot.available, 5);
}

#[tokio::test]
async fn cancelled_invoice_releases_all_its_reservations() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("CAM-003", 8, dec!(10.00)).await;

    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 8)
        .await
        .unwrap();
    assert_eq!(
        compute_availability(app.db(), asset.id, None)
            .await
            .unwrap()
            .available,
        0
    );

    app.state
        .services
        .invoices
        .cancel_invoice(invoice.id)
        .await
        .unwrap();

    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.reserved, 0);
    assert_eq!(snapshot.available, 8);
    // On-hand never moved; the goods were only reserved, not sold.
    assert_eq!(snapshot.on_hand, 8);
}

#[tokio::test]
async fn paid_invoice_converts_reservation_into_on_hand_decrement() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("CAM-004", 10, dec!(50.00)).await;

    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(invoice.id, asset.id, 4)
        .await
        .unwrap();

    app.state
        .services
        .payments
        .record_transaction(stockledger::services::payments::RecordTransaction {
            invoice_id: invoice.id,
            transaction_type: stockledger::entities::transaction::TransactionType::Payment,
            amount: dec!(200.00),
            payment_method: stockledger::entities::transaction::PaymentMethod::Card,
            other_method_note: None,
            comment: "paid in full".to_string(),
            return_id: None,
        })
        .await
        .unwrap();

    // The paid invoice no longer counts as a reservation; its quantity has
    // moved out of on-hand instead. Available stays consistent throughout.
    let snapshot = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(snapshot.on_hand, 6);
    assert_eq!(snapshot.reserved, 0);
    assert_eq!(snapshot.available, 6);
}

#[tokio::test]
async fn exclude_invoice_ignores_that_invoice_lines() {
    let app = TestApp::new().await;
    let asset = app.seed_asset("CAM-005", 10, dec!(20.00)).await;

    let first = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    let second = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(first.id, asset.id, 3)
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(second.id, asset.id, 2)
        .await
        .unwrap();

    let all = compute_availability(app.db(), asset.id, None).await.unwrap();
    assert_eq!(all.reserved, 5);

    let without_first = compute_availability(app.db(), asset.id, Some(first.id))
        .await
        .unwrap();
    assert_eq!(without_first.reserved, 2);
    assert_eq!(without_first.available, 8);
}

#[tokio::test]
async fn bulk_availability_covers_assets_with_and_without_reservations() {
    let app = TestApp::new().await;
    let reserved_asset = app.seed_asset("BULK-A", 6, dec!(5.00)).await;
    let idle_asset = app.seed_asset("BULK-B", 3, dec!(5.00)).await;

    let invoice = app
        .state
        .services
        .invoices
        .create_invoice(uuid::Uuid::new_v4(), "USD")
        .await
        .unwrap();
    app.state
        .services
        .reservations
        .add_item(invoice.id, reserved_asset.id, 2)
        .await
        .unwrap();

    let mut snapshots =
        bulk_compute_availability(app.db(), &[reserved_asset.id, idle_asset.id])
            .await
            .unwrap();
    snapshots.sort_by_key(|s| s.asset_id != reserved_asset.id);

    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].reserved, 2);
    assert_eq!(snapshots[0].available, 4);
    assert_eq!(snapshots[1].reserved, 0);
    assert_eq!(snapshots[1].available, 3);
}
