//! Response header parsing for a streaming transfer.
//!
//! libcurl hands header lines over one at a time and, with redirects enabled,
//! reports every hop's header block. [`HeaderCollector`] accumulates one block
//! and yields a [`ResponseHead`] only for the final (non-1xx, non-redirect) one.

use crate::error::TransferError;

/// Parsed status and headers of the final response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u32,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub content_range: Option<String>,
    location: bool,
}

/// `Content-Range: bytes <start>-<end>/<total|*>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` for `/*`.
    pub total: Option<u64>,
}

/// How the transfer should treat the server's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `200`: whole entity from byte 0.
    Full {
        content_length: Option<u64>,
        accept_ranges: bool,
    },
    /// `206`: continuation from the requested offset.
    Partial { total: Option<u64> },
}

/// Outcome of feeding one header line.
#[derive(Debug, PartialEq, Eq)]
pub enum HeaderLine {
    /// More lines to come for this block.
    Pending,
    /// An informational or redirect block ended; another block follows.
    Interim,
    /// The final block ended.
    Final(ResponseHead),
}

#[derive(Debug, Default)]
pub struct HeaderCollector {
    current: Option<ResponseHead>,
}

impl HeaderCollector {
    pub fn feed(&mut self, raw: &[u8]) -> HeaderLine {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        if line.starts_with("HTTP/") {
            let status = line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse::<u32>().ok())
                .unwrap_or(0);
            self.current = Some(ResponseHead {
                status,
                ..ResponseHead::default()
            });
            return HeaderLine::Pending;
        }

        if line.is_empty() {
            let Some(head) = self.current.take() else {
                return HeaderLine::Pending;
            };
            let redirect = (300..400).contains(&head.status) && head.location;
            return if (100..200).contains(&head.status) || redirect {
                HeaderLine::Interim
            } else {
                HeaderLine::Final(head)
            };
        }

        let Some(head) = self.current.as_mut() else {
            return HeaderLine::Pending;
        };

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                head.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                head.accept_ranges = value.eq_ignore_ascii_case("bytes");
            } else if name.eq_ignore_ascii_case("content-range") {
                head.content_range = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("location") {
                head.location = true;
            }
        }
        HeaderLine::Pending
    }
}

/// Parse a `Content-Range` value. Returns `None` when malformed.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim().parse::<u64>().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        n => {
            let n = n.parse::<u64>().ok()?;
            if end >= n {
                return None;
            }
            Some(n)
        }
    };
    Some(ContentRange { start, end, total })
}

/// Decide how to handle the final response of a request made at `offset`.
pub fn classify(head: &ResponseHead, offset: u64) -> Result<ResponseKind, TransferError> {
    match head.status {
        200 => Ok(ResponseKind::Full {
            content_length: head.content_length,
            accept_ranges: head.accept_ranges,
        }),
        206 => {
            let raw = head.content_range.as_deref().ok_or_else(|| {
                TransferError::Protocol("206 response without Content-Range".to_string())
            })?;
            let range = parse_content_range(raw).ok_or_else(|| {
                TransferError::Protocol(format!("malformed Content-Range: {raw}"))
            })?;
            if range.start != offset {
                return Err(TransferError::Protocol(format!(
                    "server resumed at byte {} instead of {}",
                    range.start, offset
                )));
            }
            Ok(ResponseKind::Partial { total: range.total })
        }
        code => Err(TransferError::http_status(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(collector: &mut HeaderCollector, lines: &[&str]) -> Vec<HeaderLine> {
        lines
            .iter()
            .map(|l| collector.feed(format!("{l}\r\n").as_bytes()))
            .filter(|r| *r != HeaderLine::Pending)
            .collect()
    }

    #[test]
    fn final_block_after_redirect() {
        let mut c = HeaderCollector::default();
        let out = feed_all(
            &mut c,
            &[
                "HTTP/1.1 302 Found",
                "Location: https://mirror.example.com/file",
                "",
                "HTTP/1.1 200 OK",
                "Content-Length: 12345",
                "Accept-Ranges: bytes",
                "",
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], HeaderLine::Interim);
        let HeaderLine::Final(head) = &out[1] else {
            panic!("expected final block");
        };
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length, Some(12345));
        assert!(head.accept_ranges);
    }

    #[test]
    fn continue_block_is_interim() {
        let mut c = HeaderCollector::default();
        let out = feed_all(&mut c, &["HTTP/1.1 100 Continue", "", "HTTP/2 404", ""]);
        assert_eq!(out[0], HeaderLine::Interim);
        assert!(matches!(&out[1], HeaderLine::Final(h) if h.status == 404));
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(
            parse_content_range("bytes 100-199/1000"),
            Some(ContentRange {
                start: 100,
                end: 199,
                total: Some(1000)
            })
        );
        assert_eq!(
            parse_content_range("bytes 5-9/*").map(|r| r.total),
            Some(None)
        );
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes 9-5/10"), None);
        assert_eq!(parse_content_range("bytes 0-10/10"), None);
    }

    #[test]
    fn classify_partial_requires_matching_range() {
        let head = ResponseHead {
            status: 206,
            content_range: Some("bytes 500-999/1000".into()),
            ..ResponseHead::default()
        };
        assert_eq!(
            classify(&head, 500),
            Ok(ResponseKind::Partial { total: Some(1000) })
        );
        assert!(matches!(
            classify(&head, 400),
            Err(TransferError::Protocol(_))
        ));

        let missing = ResponseHead {
            status: 206,
            ..ResponseHead::default()
        };
        assert!(matches!(
            classify(&missing, 500),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn classify_other_status_is_http_error() {
        let head = ResponseHead {
            status: 503,
            ..ResponseHead::default()
        };
        assert_eq!(
            classify(&head, 0).unwrap_err().to_string(),
            "HTTP error: 503"
        );
    }

    #[test]
    fn classify_full_reply() {
        let head = ResponseHead {
            status: 200,
            content_length: Some(42),
            accept_ranges: false,
            ..ResponseHead::default()
        };
        assert_eq!(
            classify(&head, 10),
            Ok(ResponseKind::Full {
                content_length: Some(42),
                accept_ranges: false
            })
        );
    }
}
