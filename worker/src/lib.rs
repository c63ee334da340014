pub mod backup_scheduling;
pub mod config;
pub mod usecases;
