//! Parse HTTP response header lines into a ResponseHead.

/// The parts of a response head the fetcher acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u32,
    pub content_length: Option<u64>,
    /// First byte offset from `Content-Range: bytes <start>-<end>/<total>`.
    pub range_start: Option<u64>,
    /// Complete size from `Content-Range` (also present on 416 as `bytes */<total>`).
    pub range_total: Option<u64>,
}

impl ResponseHead {
    /// Size of the whole remote resource, if the response reveals it.
    pub fn full_size(&self) -> Option<u64> {
        match self.status {
            206 | 416 => self.range_total,
            _ => self.content_length,
        }
    }
}

/// Parse the header lines of the final response (after redirects).
pub(crate) fn parse_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.starts_with("HTTP/") {
            head = ResponseHead::default();
            head.status = line
                .split_whitespace()
                .nth(1)
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                head.content_length = value.parse::<u64>().ok();
            }
            if name.eq_ignore_ascii_case("content-range") {
                let (start, total) = parse_content_range(value);
                head.range_start = start;
                head.range_total = total;
            }
        }
    }

    head
}

/// `bytes 100-199/1000` -> (Some(100), Some(1000)); `bytes */1000` -> (None, Some(1000)).
fn parse_content_range(value: &str) -> (Option<u64>, Option<u64>) {
    let Some(spec) = value.strip_prefix("bytes") else {
        return (None, None);
    };
    let Some((range, total)) = spec.trim().split_once('/') else {
        return (None, None);
    };
    let start = range
        .split_once('-')
        .and_then(|(s, _)| s.trim().parse::<u64>().ok());
    let total = total.trim().parse::<u64>().ok();
    (start, total)
}
