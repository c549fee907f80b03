use std::str::FromStr;

/// Ordered header list; names compare case-insensitively.
pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Trimmed, non-empty header value parsed as `T`; `None` on absence or parse failure.
pub fn header_parse<T: FromStr>(headers: &Headers, name: &str) -> Option<T> {
    let value = header_get(headers, name)?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<T>().ok()
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let idx = headers
        .iter()
        .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
    Some(headers.remove(idx).1)
}

/// Drops every header whose name is in `names`.
pub fn header_remove_all(headers: &mut Headers, names: &[&str]) {
    headers.retain(|(k, _)| !names.iter().any(|name| k.eq_ignore_ascii_case(name)));
}
