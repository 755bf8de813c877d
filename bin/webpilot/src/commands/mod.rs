pub mod doctor;
pub mod memory_cmd;
pub mod run_cmd;
