// Request paths are cleaned up once, before filters and routes see them.
//
// + `%2e` and `%2f` (any case) are decoded so that encoded traversal sequences are caught.
// + Backslashes, plain or as `%5c`, are read as slashes.
// + Empty segments (`//`) and `.` segments are dropped.
// + `..` removes the previous segment but never climbs above the root.
// + A trailing slash survives, since routes are trailing-slash sensitive.
pub fn normalize(path: &str) -> String {
    let decoded = decode_separators(&path.replace('\\', "/"));

    let trailing_slash = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut normalized = String::with_capacity(decoded.len() + 1);
    normalized.push('/');
    normalized.push_str(&segments.join("/"));

    if trailing_slash && !segments.is_empty() {
        normalized.push('/');
    }

    normalized
}

fn decode_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let candidate = &rest[idx..];
        match candidate.get(..3) {
            Some(code) if code.eq_ignore_ascii_case("%2e") => out.push('.'),
            Some(code) if code.eq_ignore_ascii_case("%2f") || code.eq_ignore_ascii_case("%5c") => {
                out.push('/')
            }
            _ => {
                out.push('%');
                rest = &candidate[1..];
                continue;
            }
        }
        rest = &candidate[3..];
    }

    out.push_str(rest);
    out
}
