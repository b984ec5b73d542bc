use crate::error::HubError;

/// Terminates every text record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const RECORD_SEPARATOR_BYTE: u8 = 0x1e;

/// Splits and joins record-separated text.
///
/// Transports are expected to hand over whole frames, so a buffer that does not
/// end on a separator is rejected instead of being kept for reassembly.
pub struct TextMessageFormat;

impl TextMessageFormat {
    pub fn write(output: &str) -> String {
        let mut framed = String::with_capacity(output.len() + 1);
        framed.push_str(output);
        framed.push(RECORD_SEPARATOR);

        framed
    }

    pub fn parse(input: &str) -> Result<Vec<String>, HubError> {
        if !input.ends_with(RECORD_SEPARATOR) {
            return Err(HubError::IncompleteMessage);
        }

        let mut records: Vec<String> = input.split(RECORD_SEPARATOR).map(str::to_string).collect();
        // the trailing separator leaves one empty tail
        records.pop();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_appends_separator() {
        assert_eq!(TextMessageFormat::write("{}"), "{}\u{1e}");
    }

    #[test]
    fn test_parse_multiple_records() {
        let records = TextMessageFormat::parse("{\"type\":6}\u{1e}{\"type\":7}\u{1e}").unwrap();
        assert_eq!(records, vec!["{\"type\":6}".to_string(), "{\"type\":7}".to_string()]);
    }

    #[test]
    fn test_parse_rejects_unterminated_input() {
        assert_eq!(TextMessageFormat::parse("{\"type\":6}"), Err(HubError::IncompleteMessage));
        assert_eq!(
            TextMessageFormat::parse("{\"type\":6}\u{1e}{\"type\":"),
            Err(HubError::IncompleteMessage)
        );
    }

    #[test]
    fn test_parse_keeps_empty_records() {
        let records = TextMessageFormat::parse("\u{1e}{}\u{1e}").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_empty());
    }
}
