//! Response rendering for the terminal.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use coap_client::Response;

/// RFC 1123 with a literal GMT zone.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Render a response (or notification) as printed on stdout.
///
/// Verbose mode prefixes a metadata block, whose Content-Length is always
/// present (0 for an empty body).  A non-empty body follows after a blank
/// line; without metadata the body is printed on its own.
pub fn render(response: &Response, verbose: bool, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    if verbose {
        let _ = writeln!(out, "Date: {}", now.format(HTTP_DATE));
        let _ = writeln!(out, "Code: {}", response.code_text());
        let _ = writeln!(out, "Type: {}", response.kind);
        let _ = writeln!(out, "Token: {}", hex::encode(&response.token));
        let _ = writeln!(out, "Message-ID: {}", response.message_id);
        if let Some(cf) = response.content_format {
            let _ = writeln!(out, "Content-Format: {cf}");
        }
        let _ = writeln!(out, "Content-Length: {}", response.payload.len());
    }

    if !response.payload.is_empty() {
        if verbose {
            out.push('\n');
        }
        out.push_str(&String::from_utf8_lossy(&response.payload));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use coap_client::MessageKind;

    use super::*;

    fn response(payload: &[u8]) -> Response {
        Response {
            code: 0x45,
            kind: MessageKind::Ack,
            token: vec![0xde, 0xad, 0xbe, 0xef],
            message_id: 4321,
            content_format: Some(50),
            observe: None,
            payload: payload.to_vec(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn verbose_block_then_body() {
        let rendered = render(&response(br#"{"t":21}"#), true, noon());
        assert_eq!(
            rendered,
            "Date: Fri, 01 Mar 2024 12:00:00 GMT\n\
             Code: 2.05 Content\n\
             Type: ACK\n\
             Token: deadbeef\n\
             Message-ID: 4321\n\
             Content-Format: 50\n\
             Content-Length: 8\n\
             \n\
             {\"t\":21}\n"
        );
    }

    #[test]
    fn quiet_mode_prints_only_the_body() {
        assert_eq!(render(&response(b"world"), false, noon()), "world\n");
    }

    #[test]
    fn empty_body_prints_nothing_quietly() {
        assert_eq!(render(&response(b""), false, noon()), "");
    }

    #[test]
    fn verbose_without_body_reports_zero_length() {
        let mut r = response(b"");
        r.content_format = None;
        let rendered = render(&r, true, noon());
        assert!(rendered.ends_with("Message-ID: 4321\nContent-Length: 0\n"));
        assert!(!rendered.contains("Content-Format"));
    }
}
