//! Config records.

use crate::models::LogRecord;
use crate::parser::{parse_json_of_type, LogParser};

pub fn parse_config_line(line: &str) -> Option<LogRecord> {
    parse_json_of_type(line, "config")
}

/// Parser that keeps only config records.
pub fn config_parser() -> LogParser {
    LogParser::new(Box::new(parse_config_line), "config")
}
