pub mod flag_match_reason;
pub mod flag_matching;
pub mod flag_matching_utils;
pub mod flag_metrics;
pub mod flag_models;
pub mod flag_service;
pub mod flag_store;
