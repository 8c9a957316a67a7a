//! A single message read from the mailbox.

/// Ordered multimap of header names to raw, unfolded values.
///
/// Names keep their original spelling and may repeat (several `Received`
/// headers are the norm). Lookups by name are ASCII case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Number of header lines (repeats counted individually).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the message carried no headers at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in original order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Last value for `name`.
    pub fn get_last(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Group values by exact header name, ordered by first appearance.
    pub fn grouped(&self) -> Vec<(&str, Vec<&str>)> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for (name, value) in self.iter() {
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, values)) => values.push(value),
                None => groups.push((name, vec![value])),
            }
        }
        groups
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One message of the mailbox: its headers plus the exact raw bytes.
///
/// `raw` is the entry as stored in the mailbox minus the `From ` envelope
/// line and the blank separator line, so it is a complete RFC 5322 message.
#[derive(Debug, Clone)]
pub struct MailMessage {
    offset: u64,
    headers: Headers,
    raw: Vec<u8>,
}

impl MailMessage {
    pub fn new(offset: u64, headers: Headers, raw: Vec<u8>) -> Self {
        Self {
            offset,
            headers,
            raw,
        }
    }

    /// Byte offset of the entry's envelope line inside the mailbox.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Complete message bytes (headers and body).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        [
            ("Received", "from a"),
            ("Subject", "Hi"),
            ("Received", "from b"),
            ("Message-Id", "<1@x>"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let h = sample();
        assert_eq!(h.get("subject"), Some("Hi"));
        assert_eq!(h.get("MESSAGE-ID"), Some("<1@x>"));
        assert_eq!(h.get("cc"), None);
    }

    #[test]
    fn test_repeated_headers_are_kept() {
        let h = sample();
        assert_eq!(h.len(), 4);
        assert_eq!(h.get("received"), Some("from a"));
        assert_eq!(h.get_last("received"), Some("from b"));
        assert_eq!(h.grouped()[0].1.len(), 2);
    }

    #[test]
    fn test_values_outlive_the_lookup_name() {
        let h = sample();
        let (first, last) = {
            let name = String::from("received");
            (h.get(&name), h.get_last(&name))
        };
        assert_eq!(first, Some("from a"));
        assert_eq!(last, Some("from b"));
    }

    #[test]
    fn test_grouped_keeps_first_appearance_order() {
        let h = sample();
        let groups = h.grouped();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], ("Received", vec!["from a", "from b"]));
        assert_eq!(groups[1].0, "Subject");
        assert_eq!(groups[2].0, "Message-Id");
    }
}
