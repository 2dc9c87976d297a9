//! Artifact Naming Conventions
//!
//! Pure path functions shared by the write pipeline and recovery. Committed
//! files encode the inclusive offset range they cover:
//!
//! ```text
//! <topicsDir>/<topic>/<partition>/<topic>+<partition>+<start>+<end>.<ext>
//! ```
//!
//! The `+` separator is used both when constructing and when parsing committed
//! names. Temp artifacts live in the same directory under a fresh UUID with a
//! `.tmp` extension, which [`parse_committed`] never accepts.

use basin_core::TopicPartition;
use uuid::Uuid;

/// Extension of not-yet-committed temp artifacts.
pub const TEMP_EXTENSION: &str = "tmp";

const SEPARATOR: char = '+';

/// Directory holding all artifacts for one partition.
pub fn directory_name(topics_dir: &str, tp: &TopicPartition) -> String {
    format!("{}/{}/{}", topics_dir, tp.topic, tp.partition)
}

/// A fresh, collision-unlikely temp path for the partition.
pub fn temp_file_name(topics_dir: &str, tp: &TopicPartition) -> String {
    format!(
        "{}/{}.{}",
        directory_name(topics_dir, tp),
        Uuid::new_v4(),
        TEMP_EXTENSION
    )
}

/// Committed path for the inclusive offset range `[start, end]`.
pub fn committed_file_name(
    topics_dir: &str,
    tp: &TopicPartition,
    start: u64,
    end: u64,
    extension: &str,
) -> String {
    format!(
        "{dir}/{topic}{sep}{partition}{sep}{start}{sep}{end}.{extension}",
        dir = directory_name(topics_dir, tp),
        topic = tp.topic,
        partition = tp.partition,
        sep = SEPARATOR,
        start = start,
        end = end,
        extension = extension,
    )
}

/// Parse the `(start, end)` offset range out of a committed file name.
///
/// Returns `None` for anything that is not a committed name this module would
/// emit: temp artifacts, names without an extension, non-numeric range fields,
/// or an inverted range.
pub fn parse_committed(file_name: &str) -> Option<(u64, u64)> {
    let (stem, _extension) = file_name.rsplit_once('.')?;
    let mut fields = stem.rsplit(SEPARATOR);
    let end: u64 = fields.next()?.parse().ok()?;
    let start: u64 = fields.next()?.parse().ok()?;
    let partition = fields.next()?;
    if partition.parse::<u32>().is_err() {
        return None;
    }
    // the remainder is the topic, which must be non-empty
    fields.next().filter(|topic| !topic.is_empty())?;
    if start > end {
        return None;
    }
    Some((start, end))
}

/// Filter predicate recognizing committed files in a partition directory.
pub fn is_committed_file(file_name: &str) -> bool {
    parse_committed(file_name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp() -> TopicPartition {
        TopicPartition::new("events", 3)
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    #[test]
    fn test_directory_name() {
        assert_eq!(directory_name("topics", &tp()), "topics/events/3");
    }

    #[test]
    fn test_committed_file_name() {
        let name = committed_file_name("topics", &tp(), 100, 199, "json");
        assert_eq!(name, "topics/events/3/events+3+100+199.json");
    }

    #[test]
    fn test_temp_file_name_is_fresh() {
        let a = temp_file_name("topics", &tp());
        let b = temp_file_name("topics", &tp());
        assert!(a.starts_with("topics/events/3/"));
        assert!(a.ends_with(".tmp"));
        assert_ne!(a, b);
    }

    // ---------------------------------------------------------------
    // Parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_committed_roundtrip() {
        let name = committed_file_name("topics", &tp(), 0, 42, "avro");
        let file_name = name.rsplit('/').next().unwrap();
        assert_eq!(parse_committed(file_name), Some((0, 42)));
    }

    #[test]
    fn test_parse_committed_single_record_range() {
        assert_eq!(parse_committed("events+0+7+7.json"), Some((7, 7)));
    }

    #[test]
    fn test_parse_rejects_temp_names() {
        let temp = temp_file_name("topics", &tp());
        let file_name = temp.rsplit('/').next().unwrap();
        assert_eq!(parse_committed(file_name), None);
        assert!(!is_committed_file(file_name));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_committed("README.md"), None);
        assert_eq!(parse_committed("events+3+abc+199.json"), None);
        assert_eq!(parse_committed("events+3+100+xyz.json"), None);
        assert_eq!(parse_committed("no-extension"), None);
        assert_eq!(parse_committed("+0+1+2.json"), None);
    }

    #[test]
    fn test_parse_rejects_inverted_range() {
        assert_eq!(parse_committed("events+3+200+100.json"), None);
    }

    #[test]
    fn test_parse_topic_containing_separator() {
        // a topic named "a+b" still yields the trailing range fields
        assert_eq!(parse_committed("a+b+0+10+12.json"), Some((10, 12)));
    }
}
