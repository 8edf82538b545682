//! Remote symbolization through the symbolz protocol
//!
//! The profiled server is asked to name addresses itself: a POST of
//! `0x<addr>+0x<addr>...` to its symbol endpoint answers one
//! `0x<addr> <name>` pair per line. Addresses are sent in the address
//! space of the source the mapping was fetched from.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use profetch_common::{Line, Profile};
use url::Url;

use super::symbolizer::DwarfSymbolizer;
use crate::domain::MappingSources;
use crate::fetch::resolver::transport_timeout;

/// Symbol endpoint for a profile source URL.
///
/// Sources served under `/debug/pprof/` use `/debug/pprof/symbol`; anything
/// else uses `/symbolz`.
#[must_use]
pub fn symbolz_url(source: &str) -> Option<String> {
    let mut url = Url::parse(source).ok()?;
    if !url.has_host() {
        return None;
    }
    let path =
        if url.path().starts_with("/debug/pprof/") { "/debug/pprof/symbol" } else { "/symbolz" };
    url.set_path(path);
    url.set_query(None);
    Some(url.to_string())
}

/// Parse a symbolz response into address to symbol name.
#[must_use]
pub fn parse_symbolz(body: &str) -> HashMap<u64, String> {
    body.lines()
        .filter_map(|line| {
            let (addr, name) = line.trim().split_once(char::is_whitespace)?;
            let addr = u64::from_str_radix(addr.strip_prefix("0x")?, 16).ok()?;
            let name = name.trim();
            (!name.is_empty()).then(|| (addr, name.to_string()))
        })
        .collect()
}

fn post_symbolz(url: &str, addrs: &[u64], timeout: Duration) -> Result<HashMap<u64, String>> {
    let body = addrs.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join("+");
    let agent = ureq::AgentBuilder::new().timeout(transport_timeout(timeout)).build();
    let response = match agent.post(url).send_string(&body) {
        Ok(r) => r,
        Err(ureq::Error::Status(code, r)) => bail!("{url}: {code} {}", r.status_text()),
        Err(e) => return Err(e).with_context(|| format!("symbolz request to {url}")),
    };
    let text = response.into_string().context("reading symbolz response")?;
    Ok(parse_symbolz(&text))
}

/// Ask the origin of every unsymbolized mapping to name its addresses.
///
/// Every recorded origin is tried in turn until one answers. Returns the
/// number of locations that gained a function name.
pub fn symbolize_remote(p: &mut Profile, sources: &MappingSources, timeout: Duration) -> usize {
    let mut symbolized = 0;
    for mi in 0..p.mapping.len() {
        let m = p.mapping[mi].clone();
        if m.has_functions {
            continue;
        }
        let locations: Vec<usize> = p
            .location
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.mapping_id == m.id && loc.line.is_empty())
            .map(|(li, _)| li)
            .collect();
        if locations.is_empty() {
            continue;
        }

        for src in sources.sources_for(&m) {
            let Some(url) = symbolz_url(&src.source) else {
                continue;
            };
            let remote = |addr: u64| addr.wrapping_sub(m.start).wrapping_add(src.start);
            let addrs: Vec<u64> =
                locations.iter().map(|&li| remote(p.location[li].address)).collect();
            let names = match post_symbolz(&url, &addrs, timeout) {
                Ok(names) => names,
                Err(e) => {
                    warn!("Remote symbolization via {url} failed: {e:#}");
                    continue;
                }
            };

            for &li in &locations {
                let Some(raw) = names.get(&remote(p.location[li].address)) else {
                    continue;
                };
                let name = DwarfSymbolizer::demangle_symbol(raw);
                let function_id = p.intern_function(&name, raw, "");
                p.location[li].line = vec![Line { function_id, line: 0, column: 0 }];
                symbolized += 1;
            }
            p.mapping[mi].has_functions = true;
            debug!("Symbolized mapping {} via {url}", m.id);
            break;
        }
    }
    symbolized
}
