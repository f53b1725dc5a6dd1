//! File responses and static file serving
use crate::context::Context;
use crate::response::{Body, Reply, Stream};
use crate::signal::{halt, Fault, Outcome, Signal};
use crate::status;
use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use jiff::Timestamp;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

const CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Returns the media type for a file extension (with or without the leading dot)
pub fn mime_type(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    let media_type = match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "txt" | "text" => "text/plain",
        "md" => "text/markdown",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "xhtml" => "application/xhtml+xml",
        "atom" => "application/atom+xml",
        "rss" => "application/rss+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        "bin" => FALLBACK_MEDIA_TYPE,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(media_type)
}

/// Formats `time` as an HTTP date (`Fri, 01 Mar 2024 12:00:00 GMT`)
pub(crate) fn http_date(time: Timestamp) -> String {
    time.strftime("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date. Returns `None` for anything unparseable.
pub(crate) fn parse_http_date(value: &str) -> Option<Timestamp> {
    jiff::fmt::rfc2822::parse(value.trim())
        .ok()
        .map(|zoned| zoned.timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Attachment,
    Inline,
}

/// Options for [`Context::send_file`]
#[derive(Debug, Clone, Default)]
pub struct SendFile {
    /// File name suggested to the client. Implies an attachment.
    pub filename: Option<String>,
    pub disposition: Option<Disposition>,
    /// Overrides the file's modification time
    pub last_modified: Option<Timestamp>,
    /// Overrides the media type derived from the extension
    pub content_type: Option<String>,
    /// Sends at most this many bytes from the start of the file
    pub length: Option<u64>,
    /// Overrides the response status
    pub status: Option<u16>,
}

impl SendFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = Some(disposition);
        self
    }

    pub fn last_modified(mut self, time: Timestamp) -> Self {
        self.last_modified = Some(time);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn status(mut self, code: u16) -> Self {
        self.status = Some(code);
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("File not found: {0}")]
pub struct FileNotFound(pub Utf8PathBuf);

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial(u64, u64),
    Unsatisfiable,
}

/// Interprets a `Range` header against a file of `len` bytes.
///
/// Only a single `bytes=` range is honored. Anything else falls back to the full file.
fn byte_range(header: Option<&str>, len: u64) -> ByteRange {
    let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };

    if ranges.contains(',') {
        return ByteRange::Full;
    }

    let Some((start, end)) = ranges.trim().split_once('-') else {
        return ByteRange::Full;
    };

    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return ByteRange::Full,
        ("", suffix) => {
            let Ok(suffix) = suffix.parse::<u64>() else {
                return ByteRange::Full;
            };
            if suffix == 0 || len == 0 {
                return ByteRange::Unsatisfiable;
            }
            (len.saturating_sub(suffix), len - 1)
        }
        (start, end) => {
            let Ok(start) = start.parse::<u64>() else {
                return ByteRange::Full;
            };
            let end = if end.is_empty() {
                len.saturating_sub(1)
            } else {
                match end.parse::<u64>() {
                    Ok(end) => end.min(len.saturating_sub(1)),
                    Err(_) => return ByteRange::Full,
                }
            };
            if start >= len || start > end {
                return ByteRange::Unsatisfiable;
            }
            (start, end)
        }
    };

    ByteRange::Partial(start, end)
}

struct FileChunks {
    file: File,
    remaining: u64,
}

impl Iterator for FileChunks {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.remaining == 0 {
            return None;
        }

        let size = self.remaining.min(CHUNK_SIZE as u64) as usize;
        let mut chunk = vec![0; size];
        match self.file.read(&mut chunk) {
            Ok(0) => None,
            Ok(n) => {
                chunk.truncate(n);
                self.remaining -= n as u64;
                Some(chunk)
            }
            Err(err) => {
                log::warn!(error:err = err; "Failed to read file chunk");
                None
            }
        }
    }
}

pub(crate) fn send_file(ctx: &mut Context, path: &Utf8Path, options: &SendFile) -> Signal {
    match serve(ctx, path, options) {
        Ok(()) => halt(()),
        Err(signal) => signal,
    }
}

fn serve(ctx: &mut Context, path: &Utf8Path, options: &SendFile) -> Outcome<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(not_found(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found(path)),
        Err(err) => return Err(err.into()),
    };

    let media_type = match &options.content_type {
        Some(media_type) => media_type.clone(),
        None => path
            .extension()
            .and_then(mime_type)
            .unwrap_or(FALLBACK_MEDIA_TYPE)
            .to_string(),
    };
    let content_type = ctx.settings.with_charset(&media_type);
    ctx.response.insert_header("Content-Type", content_type);

    match (options.disposition, &options.filename) {
        (Some(Disposition::Attachment), None) => ctx.attachment(path.file_name()),
        (_, Some(filename)) => ctx.attachment(Some(filename)),
        (Some(Disposition::Inline), None) => {
            ctx.response.insert_header("Content-Disposition", "inline");
        }
        (None, None) => {}
    }

    let modified = match options.last_modified {
        Some(time) => time,
        None => {
            let mtime = FileTime::from_last_modification_time(&metadata);
            Timestamp::from_second(mtime.unix_seconds()).map_err(Fault::new)?
        }
    };
    ctx.last_modified(modified)?;

    let len = options
        .length
        .map_or(metadata.len(), |length| length.min(metadata.len()));

    ctx.response.insert_header("Accept-Ranges", "bytes");

    let (code, start, count) = match byte_range(ctx.request.header("Range"), len) {
        ByteRange::Full => (status::OK, 0, len),
        ByteRange::Partial(start, end) => {
            ctx.response
                .insert_header("Content-Range", format!("bytes {start}-{end}/{len}"));
            (status::PARTIAL_CONTENT, start, end - start + 1)
        }
        ByteRange::Unsatisfiable => {
            ctx.response
                .insert_header("Content-Range", format!("bytes */{len}"));
            return Err(halt(Reply::Pair(
                status::RANGE_NOT_SATISFIABLE,
                Body::default(),
            )));
        }
    };

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;

    ctx.response
        .insert_header("Content-Length", count.to_string());
    ctx.response.status = options.status.unwrap_or(code);
    ctx.response.body = Body::Stream(Stream::new(FileChunks {
        file,
        remaining: count,
    }));

    Ok(())
}

fn not_found(path: &Utf8Path) -> Signal {
    Fault::new(FileNotFound(path.to_path_buf()))
        .with_status(status::NOT_FOUND)
        .into()
}

/// Serves the request path from the public folder if a matching file exists.
///
/// Paths that try to climb out of the folder are never served.
pub(crate) fn serve_static(ctx: &mut Context) -> Option<Signal> {
    let folder = ctx.settings.public_folder.clone()?;

    let relative = percent_encoding::percent_decode_str(ctx.path().trim_start_matches('/'))
        .decode_utf8_lossy()
        .into_owned();

    if relative.is_empty() || relative.split('/').any(|segment| segment == "..") {
        return None;
    }

    let candidate = folder.join(relative);
    if !candidate.is_file() {
        return None;
    }

    if let Some(cache_control) = ctx.settings.static_cache_control.clone() {
        ctx.response.insert_header("Cache-Control", cache_control);
    }

    ctx.logger().debug(format_args!("Serving static file {candidate}"));
    Some(send_file(ctx, &candidate, &SendFile::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::settings::{Environment, Settings};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct TempDir(Utf8PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "crooner-{name}-{}",
                std::process::id()
            ));
            let dir = Utf8PathBuf::from_path_buf(dir).unwrap();
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn file(&self, name: &str, contents: &str) -> Utf8PathBuf {
            let path = self.0.join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn context(request: Request, settings: Settings) -> Context {
        Context::new(request, Arc::new(settings))
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_type("json"), Some("application/json"));
        assert_eq!(mime_type(".PNG"), Some("image/png"));
        assert_eq!(mime_type("nope"), None);
    }

    #[test]
    fn http_dates() {
        let time: Timestamp = "1994-11-06T08:49:37Z".parse().unwrap();
        assert_eq!(http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(time));
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn byte_ranges() {
        assert_eq!(byte_range(None, 10), ByteRange::Full);
        assert_eq!(byte_range(Some("bytes=0-4"), 10), ByteRange::Partial(0, 4));
        assert_eq!(byte_range(Some("bytes=5-"), 10), ByteRange::Partial(5, 9));
        assert_eq!(byte_range(Some("bytes=-3"), 10), ByteRange::Partial(7, 9));
        assert_eq!(byte_range(Some("bytes=2-100"), 10), ByteRange::Partial(2, 9));
        assert_eq!(byte_range(Some("bytes=10-"), 10), ByteRange::Unsatisfiable);
        assert_eq!(byte_range(Some("bytes=5-2"), 10), ByteRange::Unsatisfiable);
        assert_eq!(byte_range(Some("bytes=0-1,4-5"), 10), ByteRange::Full);
        assert_eq!(byte_range(Some("lines=1-2"), 10), ByteRange::Full);
    }

    #[test]
    fn sends_files() {
        let dir = TempDir::new("sends-files");
        let path = dir.file("hello.txt", "hello world");

        let mut ctx = context(Request::default(), Settings::default());
        assert_matches!(
            ctx.send_file(&path, SendFile::new()),
            Signal::Halt(Reply::Empty)
        );

        let response = ctx.into_response();
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Content-Type"), Some("text/plain;charset=utf-8"));
        assert_eq!(response.header("Content-Length"), Some("11"));
        assert!(response.header("Last-Modified").is_some());
        assert_eq!(response.into_body_string(), "hello world");
    }

    #[test]
    fn sends_partial_content() {
        let dir = TempDir::new("partial");
        let path = dir.file("data.bin", "0123456789");

        let request = Request::default().with_header("Range", "bytes=2-5");
        let mut ctx = context(request, Settings::default());
        ctx.send_file(&path, SendFile::new());

        let response = ctx.into_response();
        assert_eq!(response.status(), 206);
        assert_eq!(response.header("Content-Range"), Some("bytes 2-5/10"));
        assert_eq!(response.header("Content-Type"), Some("application/octet-stream"));
        assert_eq!(response.into_body_string(), "2345");

        let request = Request::default().with_header("Range", "bytes=20-");
        let mut ctx = context(request, Settings::default());
        assert_matches!(
            ctx.send_file(&path, SendFile::new()),
            Signal::Halt(Reply::Pair(416, _))
        );
    }

    #[test]
    fn attachment_options() {
        let dir = TempDir::new("attachment");
        let path = dir.file("report.csv", "a,b");

        let mut ctx = context(Request::default(), Settings::default());
        ctx.send_file(&path, SendFile::new().filename("q1.csv"));
        assert_eq!(
            ctx.response().header("Content-Disposition"),
            Some("attachment; filename=\"q1.csv\"")
        );

        let mut ctx = context(Request::default(), Settings::default());
        ctx.send_file(&path, SendFile::new().disposition(Disposition::Inline));
        assert_eq!(ctx.response().header("Content-Disposition"), Some("inline"));
    }

    #[test]
    fn missing_files_are_not_found_faults() {
        let mut ctx = context(Request::default(), Settings::default());
        let signal = ctx.send_file("/definitely/not/here.txt", SendFile::new());
        assert_matches!(signal, Signal::Fault(fault) => {
            assert_eq!(fault.status(), Some(404));
            assert!(fault.is::<FileNotFound>());
        });
    }

    #[test]
    fn static_files_stay_inside_the_public_folder() {
        let dir = TempDir::new("static");
        dir.file("app.css", "body {}");
        let settings = Settings::for_environment(Environment::Test).public_folder(dir.0.clone());

        let mut ctx = context(Request::new("GET", "/app.css"), settings.clone());
        assert_matches!(serve_static(&mut ctx), Some(Signal::Halt(_)));
        assert_eq!(ctx.into_response().into_body_string(), "body {}");

        let mut ctx = context(Request::new("GET", "/missing.css"), settings.clone());
        assert_matches!(serve_static(&mut ctx), None);

        let mut ctx = context(Request::new("GET", "/../etc/passwd"), settings.clone());
        assert_matches!(serve_static(&mut ctx), None);

        let mut ctx = context(Request::new("GET", "/"), settings);
        assert_matches!(serve_static(&mut ctx), None);
    }
}
