pub mod asset;
pub mod credit_application;
pub mod customer_credit;
pub mod invoice;
pub mod invoice_item;
pub mod invoice_return;
pub mod return_item;
pub mod transaction;
