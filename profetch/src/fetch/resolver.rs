//! Built-in source resolver
//!
//! A source string is one of:
//! - an HTTP(S) URL, or a bare `host:port/path` that becomes one
//! - a local perf capture (`PERFILE2` magic), converted to a profile first
//! - any other local file, read as a serialized profile

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use log::debug;
use profetch_common::Profile;
use url::{ParseError, Url};

use crate::domain::{FetchError, FetchResult};
use crate::plugin::{Fetched, Ui};

/// Timeout used when neither a timeout nor a duration is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Added to the fetch timeout for the HTTP transport.
pub const NETWORK_GRACE: Duration = Duration::from_secs(5);

const PERF_MAGIC: &[u8; 8] = b"PERFILE2";

/// An HTTP source ready to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub url: String,
    pub timeout: Duration,
}

/// Parse `source` as a URL with a host, retrying with `http://` for bare
/// `host:port/path` forms.
fn parse_url(source: &str) -> Option<Url> {
    let retry = || Url::parse(&format!("http://{source}")).ok();
    let url = match Url::parse(source) {
        Ok(u) if u.scheme() == "file" => Some(u),
        Ok(u) if u.has_host() => Some(u),
        // `localhost:8080/x` parses with `localhost` as the scheme.
        Ok(_) => retry(),
        Err(ParseError::RelativeUrlWithoutBase) => {
            let first_segment = source.split('/').next().unwrap_or_default();
            if first_segment.contains(':') {
                retry()
            } else {
                None
            }
        }
        Err(_) => retry(),
    };
    url.filter(|u| u.host_str().is_some_and(|h| !h.is_empty()))
}

/// Classify `source` as remote and canonicalize it.
///
/// A positive `duration` replaces any `seconds` query parameter; otherwise
/// an existing `seconds` parameter supplies the duration. The timeout is
/// `timeout` when positive, else 1.5x the duration, else
/// [`DEFAULT_TIMEOUT`]. Query parameters come out sorted by key.
///
/// Returns `None` for sources that are not HTTP URLs.
#[must_use]
pub fn adjust_url(source: &str, duration: Duration, timeout: Duration) -> Option<RemoteSource> {
    let mut url = parse_url(source)?;

    let mut pairs: Vec<(String, String)> =
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    let mut duration = duration;
    if duration.is_zero() {
        if let Some(secs) = pairs
            .iter()
            .find(|(k, _)| k == "seconds")
            .and_then(|(_, v)| v.parse::<i32>().ok())
            .and_then(|s| u64::try_from(s).ok())
        {
            duration = Duration::from_secs(secs);
        }
    } else {
        pairs.retain(|(k, _)| k != "seconds");
        pairs.push(("seconds".to_string(), duration.as_secs().to_string()));
    }

    let timeout = if !timeout.is_zero() {
        timeout
    } else if !duration.is_zero() {
        duration + duration / 2
    } else {
        DEFAULT_TIMEOUT
    };

    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    Some(RemoteSource { url: url.to_string(), timeout })
}

/// True if the file at `path` starts with the perf capture magic.
#[must_use]
pub fn is_perf_file(path: &Path) -> bool {
    let mut magic = [0u8; 8];
    File::open(path).and_then(|mut f| f.read_exact(&mut magic)).is_ok() && &magic == PERF_MAGIC
}

/// Run `converter <input> <output>` and return the converted profile bytes.
///
/// The output lives in a temporary file removed once its contents have
/// been read.
fn convert_perf_data(input: &Path, converter: &Path, ui: &dyn Ui) -> FetchResult<Vec<u8>> {
    ui.print(&format!(
        "Converting {} to a profile.proto... (May take a few minutes)",
        input.display()
    ));
    let output = tempfile::Builder::new().prefix("profetch-perf-").suffix(".pb.gz").tempfile()?;

    let status = Command::new(converter)
        .arg(input)
        .arg(output.path())
        .stdin(Stdio::null())
        .status()
        .map_err(|e| FetchError::Conversion(format!("{}: {e}", converter.display())))?;
    if !status.success() {
        let msg = format!("{} exited with {status}", converter.display());
        return Err(FetchError::Conversion(msg));
    }

    Ok(fs::read(output.path())?)
}

/// Socket timeout for a request whose profile may take `timeout` to arrive.
#[must_use]
pub fn transport_timeout(timeout: Duration) -> Duration {
    timeout + NETWORK_GRACE
}

/// Error for a non-2xx response.
///
/// The pprof handlers of Go servers explain failures in a plain-text body,
/// which is kept.
fn status_error(code: u16, response: ureq::Response) -> FetchError {
    let status = format!("{code} {}", response.status_text());
    let from_pprof = response.header("X-Go-Pprof").is_some_and(|v| !v.is_empty())
        && response.header("Content-Type").is_some_and(|v| v.contains("text/plain"));
    if from_pprof {
        if let Ok(body) = response.into_string() {
            return FetchError::HttpStatus(format!("{status} - {body}"));
        }
    }
    FetchError::HttpStatus(status)
}

fn fetch_url(url: &str, timeout: Duration) -> FetchResult<Vec<u8>> {
    let transport = transport_timeout(timeout);
    let agent =
        ureq::AgentBuilder::new().timeout_connect(transport).timeout_read(transport).build();
    let response = match agent.get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::Status(code, r)) => return Err(status_error(code, r)),
        Err(e) => return Err(FetchError::Http { url: url.to_string(), error: e.to_string() }),
    };

    let mut data = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|e| FetchError::Http { url: url.to_string(), error: e.to_string() })?;
    Ok(data)
}

/// Fetch and parse `source` with the built-in resolver.
///
/// # Errors
/// Returns an error if the source cannot be fetched, converted, read or
/// parsed.
pub fn fetch(
    source: &str,
    duration: Duration,
    timeout: Duration,
    converter: &Path,
    ui: &dyn Ui,
) -> FetchResult<Fetched> {
    let (data, origin) = if let Some(remote) = adjust_url(source, duration, timeout) {
        ui.print(&format!("Fetching profile over HTTP from {}", remote.url));
        if !duration.is_zero() {
            ui.print(&format!("Please wait... ({}s)", duration.as_secs()));
        }
        debug!("GET {} (timeout {:?})", remote.url, remote.timeout);
        (fetch_url(&remote.url, remote.timeout)?, remote.url)
    } else if is_perf_file(Path::new(source)) {
        (convert_perf_data(Path::new(source), converter, ui)?, String::new())
    } else {
        let data = fs::read(source).map_err(|e| open_error(source, e))?;
        (data, String::new())
    };

    let profile = Profile::parse(&data)?;
    Ok(Fetched { profile, source: origin })
}

fn open_error(path: &str, source: io::Error) -> FetchError {
    FetchError::Open { path: path.to_string(), source }
}
