use actix_web::http::header::HeaderMap;

/// Extracts the caller's application identifier from the inbound headers.
///
/// Two header shapes identify an application:
///
/// - `Api-Key: application=<id>.token=<token>` — fields separated by `.`,
///   each a `key=value` pair; the value of the `application` field wins.
/// - `Content-Signature: signer=<id>;signature=<hex>` — fields separated by
///   `;`; the value of the `signer` field wins.
///
/// `Api-Key` is checked first; when it is well-formed but carries no
/// `application` field, the lookup falls through to `Content-Signature`.
/// Keys and values are trimmed of surrounding whitespace; key comparison
/// is case-sensitive. A field that is not a `key=value` pair aborts the
/// whole lookup, and the request is then treated as carrying no
/// application identifier at all.
pub fn extract_application_id(headers: &HeaderMap) -> Option<String> {
    if let Some(header) = non_empty_header(headers, "Api-Key") {
        match find_field(header, '.', "application") {
            FieldScan::Found(id) => return Some(id),
            FieldScan::Malformed => return None,
            FieldScan::NotFound => {}
        }
    }
    if let Some(header) = non_empty_header(headers, "Content-Signature") {
        if let FieldScan::Found(id) = find_field(header, ';', "signer") {
            return Some(id);
        }
    }
    None
}

enum FieldScan {
    /// The keyed field was present; its trimmed value.
    Found(String),
    /// Every field was a `key=value` pair, none matched.
    NotFound,
    /// A field was not a `key=value` pair; the whole header is discarded.
    Malformed,
}

fn non_empty_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn find_field(header: &str, separator: char, key: &str) -> FieldScan {
    for field in header.split(separator) {
        let mut tokens = field.split('=');
        let (Some(field_key), Some(field_value)) = (tokens.next(), tokens.next()) else {
            return FieldScan::Malformed;
        };
        if field_key.trim() == key {
            return FieldScan::Found(field_value.trim().to_string());
        }
    }
    FieldScan::NotFound
}
