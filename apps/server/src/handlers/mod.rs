pub mod appointments;
pub mod booking;
pub mod clients;
pub mod health;
pub mod settings;
