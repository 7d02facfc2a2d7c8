pub mod ledger;
pub mod location;
pub mod rider;
pub mod task;
