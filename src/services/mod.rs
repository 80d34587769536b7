pub mod content_type;
pub mod ledger;
pub mod naming;
pub mod range;
pub mod storage_service;
pub mod streaming;
