use std::path::Path;

use bytesize::ByteSize;
use hdrhistogram::Histogram;
use serde::ser::SerializeMap;
use serde::Serializer;

/// Resident set size of this process, for progress lines. Returns zero
/// where /proc is unavailable.
pub fn read_rss() -> ByteSize {
    let path = Path::new("/proc")
        .join(std::process::id().to_string())
        .join("stat");
    let stat = match std::fs::read_to_string(path) {
        Ok(stat) => stat,
        Err(_) => return ByteSize::b(0),
    };
    stat.split(' ')
        .nth(23)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| ByteSize::kib(4 * pages))
        .unwrap_or(ByteSize::b(0))
}

/// Serializes a histogram as a small summary map.
pub fn serialize_histogram<S>(h: &Histogram<u64>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = s.serialize_map(Some(4))?;
    map.serialize_entry("count", &h.len())?;
    map.serialize_entry("mean", &h.mean())?;
    map.serialize_entry("p99", &h.value_at_quantile(0.99))?;
    map.serialize_entry("max", &h.max())?;
    map.end()
}
