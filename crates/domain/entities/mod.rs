pub mod remote_entries;
