pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod enrollment;
pub mod logs;
pub mod reports;
pub mod sections;
pub mod settings;
pub mod strands;
pub mod students;
pub mod subjects;
pub mod users;
