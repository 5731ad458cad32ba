pub mod check_result;
pub mod monitored_target;
