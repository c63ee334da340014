pub mod backup_cycle;
pub mod prune_backups;
pub mod resumable_upload;
