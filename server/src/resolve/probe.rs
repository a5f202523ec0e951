//! HTTP probing and container sniffing for source resolution.
//!
//! A HEAD probe classifies reachability and advertised content type; when
//! that is ambiguous, a 1 KiB range probe fetches the file head so the
//! container can be identified from magic bytes.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header;

/// How many leading bytes the range probe asks for.
pub const RANGE_WINDOW: usize = 1024;

/// What a HEAD probe observed.
#[derive(Debug, Clone)]
pub struct HeadProbe {
    pub status: u16,
    /// Lowercased media type with parameters stripped.
    pub content_type: Option<String>,
    pub accept_ranges: Option<String>,
}

/// HEAD probe result. Network failures are terminal; the resolver degrades
/// to proxy delivery without retrying.
#[derive(Debug)]
pub enum HeadOutcome {
    Response(HeadProbe),
    Failed,
}

/// Range probe result.
#[derive(Debug)]
pub enum RangeOutcome {
    /// The origin refused the ranged read (401/403).
    Denied,
    /// Leading bytes of the file, at most [`RANGE_WINDOW`].
    Bytes(Vec<u8>),
    Failed,
}

/// Container signature found in the leading bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4 {
        /// Brands suggest HEVC content, which some browsers refuse.
        hevc: bool,
    },
    Webm,
    Ts,
}

impl Container {
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Mp4 { .. } => "mp4",
            Self::Webm => "webm",
            Self::Ts => "ts",
        }
    }
}

/// Issue a HEAD request, following redirects.
pub async fn head(client: &reqwest::Client, url: &str, timeout: Duration) -> HeadOutcome {
    match client.head(url).timeout(timeout).send().await {
        Ok(resp) => {
            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(normalize_content_type);
            let accept_ranges = resp
                .headers()
                .get(header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            HeadOutcome::Response(HeadProbe {
                status: resp.status().as_u16(),
                content_type,
                accept_ranges,
            })
        }
        Err(_) => HeadOutcome::Failed,
    }
}

/// Fetch the first [`RANGE_WINDOW`] bytes with a ranged GET. Origins that
/// ignore the Range header are handled by cutting the stream off at the
/// window size.
pub async fn range(client: &reqwest::Client, url: &str, timeout: Duration) -> RangeOutcome {
    let resp = match client
        .get(url)
        .header(header::RANGE, format!("bytes=0-{}", RANGE_WINDOW - 1))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(_) => return RangeOutcome::Failed,
    };

    let status = resp.status().as_u16();
    if status == 401 || status == 403 {
        return RangeOutcome::Denied;
    }
    if !resp.status().is_success() {
        return RangeOutcome::Failed;
    }

    let mut buf = Vec::with_capacity(RANGE_WINDOW);
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                buf.extend_from_slice(&bytes);
                if buf.len() >= RANGE_WINDOW {
                    buf.truncate(RANGE_WINDOW);
                    break;
                }
            }
            Err(_) => return RangeOutcome::Failed,
        }
    }
    RangeOutcome::Bytes(buf)
}

/// Lowercase a content type and strip its parameters
/// (`Video/MP4; charset=x` -> `video/mp4`).
#[must_use]
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_lowercase()
}

/// Identify the container from a file's leading bytes.
#[must_use]
pub fn sniff_container(bytes: &[u8]) -> Option<Container> {
    // ISO BMFF: box size (4 BE) then "ftyp"
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        let box_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let end = box_size.clamp(8, bytes.len());
        let brands = &bytes[8..end];
        let hevc = brands
            .windows(4)
            .any(|w| w == b"hvc1" || w == b"hev1");
        return Some(Container::Mp4 { hevc });
    }

    // EBML magic (Matroska / WebM)
    if bytes.len() >= 4 && bytes[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some(Container::Webm);
    }

    // MPEG-TS sync bytes at packet boundaries
    if bytes.len() > 188 && bytes[0] == 0x47 && bytes[188] == 0x47 {
        return Some(Container::Ts);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftyp(brands: &[&[u8; 4]]) -> Vec<u8> {
        let size = 8 + 4 * brands.len() as u32;
        let mut buf = size.to_be_bytes().to_vec();
        buf.extend_from_slice(b"ftyp");
        for brand in brands {
            buf.extend_from_slice(*brand);
        }
        // Trailing mdat noise must not affect brand scanning
        buf.extend_from_slice(&[0u8; 32]);
        buf
    }

    #[test]
    fn test_sniff_mp4() {
        let bytes = ftyp(&[b"isom", b"iso2", b"avc1"]);
        assert_eq!(sniff_container(&bytes), Some(Container::Mp4 { hevc: false }));
    }

    #[test]
    fn test_sniff_mp4_hevc_brands() {
        assert_eq!(
            sniff_container(&ftyp(&[b"isom", b"hvc1"])),
            Some(Container::Mp4 { hevc: true })
        );
        assert_eq!(
            sniff_container(&ftyp(&[b"hev1"])),
            Some(Container::Mp4 { hevc: true })
        );
    }

    #[test]
    fn test_sniff_hevc_brand_outside_ftyp_box_is_ignored() {
        let mut bytes = ftyp(&[b"isom"]);
        bytes.extend_from_slice(b"hvc1");
        assert_eq!(sniff_container(&bytes), Some(Container::Mp4 { hevc: false }));
    }

    #[test]
    fn test_sniff_webm() {
        let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3];
        bytes.extend_from_slice(&[0u8; 64]);
        assert_eq!(sniff_container(&bytes), Some(Container::Webm));
    }

    #[test]
    fn test_sniff_ts() {
        let mut bytes = vec![0u8; 400];
        bytes[0] = 0x47;
        bytes[188] = 0x47;
        assert_eq!(sniff_container(&bytes), Some(Container::Ts));
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff_container(b"<!DOCTYPE html><html>"), None);
        assert_eq!(sniff_container(&[]), None);
        // 0x47 at 0 alone is not TS
        let mut bytes = vec![0u8; 400];
        bytes[0] = 0x47;
        assert_eq!(sniff_container(&bytes), None);
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("Video/MP4; charset=utf-8"), "video/mp4");
        assert_eq!(normalize_content_type("  text/html "), "text/html");
        assert_eq!(
            normalize_content_type("application/octet-stream"),
            "application/octet-stream"
        );
    }
}
