pub mod analyze;
pub mod rules;
pub mod verify_models;
