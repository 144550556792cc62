pub mod backup;
pub mod deploy;
pub mod history;
pub mod monitor;
pub mod rollback;
