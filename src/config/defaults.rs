use super::constants::*;

pub(crate) fn user() -> String {
    "local".to_string()
}

pub(crate) fn log_level() -> Option<String> {
    Some("info".to_string())
}

pub(crate) fn log_file_path() -> String {
    LOG_FILE_PATH.to_string()
}

pub(crate) fn generator_endpoint() -> String {
    GENERATOR_ENDPOINT.to_string()
}

pub(crate) fn generator_model() -> String {
    GENERATOR_MODEL.to_string()
}

pub(crate) fn transcript_endpoint() -> String {
    TRANSCRIPT_ENDPOINT.to_string()
}

pub(crate) fn metadata_endpoint() -> String {
    METADATA_ENDPOINT.to_string()
}

pub(crate) fn poll_interval_secs() -> u64 {
    POLL_INTERVAL_SECS
}

pub(crate) fn default_true() -> bool {
    true
}
