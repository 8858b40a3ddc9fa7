pub mod catalog;
pub mod ledger;
