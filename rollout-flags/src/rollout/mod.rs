pub mod controller;
pub mod phases;
pub mod rollback;
