//! Source Resolver
//!
//! One-shot classification of a video URL into a delivery decision: play it
//! directly, route it through the byte-range proxy, or hand the client a
//! streaming manifest. Invoked synchronously when a host sets a video; the
//! resulting [`VideoMeta`] is attached to the room.

pub mod probe;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::store::models::VideoType;
use probe::{Container, HeadOutcome, HeadProbe, RangeOutcome};

/// Decision breadcrumbs attached to every resolution.
pub mod reason {
    pub const YOUTUBE_DETECTED: &str = "youtube-detected";
    pub const HLS_MANIFEST: &str = "hls-manifest";
    pub const HEAD_SUCCESS: &str = "head-success";
    pub const HEAD_NON_200: &str = "head-non-200";
    pub const HEAD_ACCESS_DENIED: &str = "head-access-denied";
    pub const RANGE_ACCESS_DENIED: &str = "range-access-denied";
    pub const CODEC_WARNING: &str = "codec-warning";
    pub const DIRECT_PLAYABLE: &str = "direct-playable";
    pub const FALLBACK_PROXY: &str = "fallback-proxy";
    pub const PROBE_TIMEOUT: &str = "probe-timeout";

    #[must_use]
    pub fn container(kind: &str) -> String {
        format!("container-{kind}")
    }
}

/// How the client should fetch the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryType {
    Youtube,
    FileDirect,
    FileProxy,
    Hls,
}

/// What the probes observed. Zero status means no probe ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSummary {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_ranges: Option<String>,
}

impl From<&HeadProbe> for ProbeSummary {
    fn from(head: &HeadProbe) -> Self {
        Self {
            status: head.status,
            content_type: head.content_type.clone(),
            accept_ranges: head.accept_ranges.clone(),
        }
    }
}

/// Immutable resolution output, attached to the room when a video is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    pub original_url: String,
    pub playback_url: String,
    pub delivery_type: DeliveryType,
    pub video_type: VideoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_warning: Option<String>,
    pub requires_proxy: bool,
    pub decision_reasons: Vec<String>,
    pub probe: ProbeSummary,
    pub timestamp: DateTime<Utc>,
}

/// Syntactic classification, before any network traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Youtube,
    Hls,
    File,
}

fn is_youtube_host(host: &str) -> bool {
    let host = host.to_lowercase();
    host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host == "youtu.be"
}

fn classify(url: &Url) -> Classification {
    if url.host_str().is_some_and(is_youtube_host) {
        return Classification::Youtube;
    }
    if url.path().to_lowercase().ends_with(".m3u8") {
        return Classification::Hls;
    }
    Classification::File
}

/// Decision after the HEAD probe.
enum HeadDecision {
    Settled(VideoMeta),
    /// Content type was absent or ambiguous; sniff the file head.
    NeedRange(ProbeSummary),
}

/// Classifies URLs and probes origins to pick a delivery mode.
#[derive(Clone)]
pub struct Resolver {
    http: reqwest::Client,
    proxy_path: String,
    probe_timeout: Duration,
    probe_deadline: Duration,
}

impl Resolver {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("wp-server/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            proxy_path: config.proxy_path.clone(),
            probe_timeout: config.probe_timeout,
            probe_deadline: config.probe_deadline,
        })
    }

    /// Resolve a URL into a delivery decision. Never fails: network errors
    /// and timeouts degrade to proxy delivery.
    pub async fn resolve(&self, raw: &str) -> VideoMeta {
        let meta = match Url::parse(raw) {
            Ok(url) => match classify(&url) {
                Classification::Youtube => direct_meta(
                    raw,
                    DeliveryType::Youtube,
                    VideoType::Youtube,
                    vec![reason::YOUTUBE_DETECTED.into()],
                ),
                Classification::Hls => direct_meta(
                    raw,
                    DeliveryType::Hls,
                    VideoType::M3u8,
                    vec![reason::HLS_MANIFEST.into()],
                ),
                Classification::File => {
                    match tokio::time::timeout(self.probe_deadline, self.probe_file(raw)).await {
                        Ok(meta) => meta,
                        Err(_) => self.proxy_meta(
                            raw,
                            vec![reason::PROBE_TIMEOUT.into(), reason::FALLBACK_PROXY.into()],
                            ProbeSummary::default(),
                        ),
                    }
                }
            },
            Err(_) => self.proxy_meta(
                raw,
                vec![reason::FALLBACK_PROXY.into()],
                ProbeSummary::default(),
            ),
        };

        debug!(
            url = raw,
            delivery = ?meta.delivery_type,
            reasons = ?meta.decision_reasons,
            "Resolved video source"
        );
        meta
    }

    async fn probe_file(&self, raw: &str) -> VideoMeta {
        let head = probe::head(&self.http, raw, self.probe_timeout).await;
        match self.after_head(raw, &head) {
            HeadDecision::Settled(meta) => meta,
            HeadDecision::NeedRange(summary) => {
                let range = probe::range(&self.http, raw, self.probe_timeout).await;
                self.after_range(raw, summary, &range)
            }
        }
    }

    fn after_head(&self, raw: &str, head: &HeadOutcome) -> HeadDecision {
        let head = match head {
            HeadOutcome::Response(head) => head,
            HeadOutcome::Failed => {
                return HeadDecision::Settled(self.proxy_meta(
                    raw,
                    vec![reason::FALLBACK_PROXY.into()],
                    ProbeSummary::default(),
                ));
            }
        };
        let summary = ProbeSummary::from(head);

        if head.status == 401 || head.status == 403 {
            return HeadDecision::Settled(self.proxy_meta(
                raw,
                vec![
                    reason::HEAD_ACCESS_DENIED.into(),
                    reason::FALLBACK_PROXY.into(),
                ],
                summary,
            ));
        }
        if !(200..300).contains(&head.status) {
            return HeadDecision::Settled(self.proxy_meta(
                raw,
                vec![reason::HEAD_NON_200.into(), reason::FALLBACK_PROXY.into()],
                summary,
            ));
        }

        match head.content_type.as_deref() {
            Some(ct) if ct.starts_with("video/") => {
                let video_type = if ct.contains("mp4") {
                    VideoType::Mp4
                } else {
                    VideoType::None
                };
                let mut meta = direct_meta(
                    raw,
                    DeliveryType::FileDirect,
                    video_type,
                    vec![reason::HEAD_SUCCESS.into(), reason::DIRECT_PLAYABLE.into()],
                );
                meta.probe = summary;
                HeadDecision::Settled(meta)
            }
            None | Some("application/octet-stream") => HeadDecision::NeedRange(summary),
            Some(_) => HeadDecision::Settled(self.proxy_meta(
                raw,
                vec![reason::HEAD_SUCCESS.into(), reason::FALLBACK_PROXY.into()],
                summary,
            )),
        }
    }

    fn after_range(&self, raw: &str, summary: ProbeSummary, range: &RangeOutcome) -> VideoMeta {
        match range {
            RangeOutcome::Denied => self.proxy_meta(
                raw,
                vec![
                    reason::HEAD_SUCCESS.into(),
                    reason::RANGE_ACCESS_DENIED.into(),
                    reason::FALLBACK_PROXY.into(),
                ],
                summary,
            ),
            RangeOutcome::Failed => self.proxy_meta(
                raw,
                vec![reason::HEAD_SUCCESS.into(), reason::FALLBACK_PROXY.into()],
                summary,
            ),
            RangeOutcome::Bytes(bytes) => match probe::sniff_container(bytes) {
                Some(container) => {
                    let mut reasons = vec![
                        reason::HEAD_SUCCESS.into(),
                        reason::container(container.kind()),
                    ];
                    let mut codec_warning = None;
                    if let Container::Mp4 { hevc: true } = container {
                        reasons.push(reason::CODEC_WARNING.into());
                        codec_warning =
                            Some("likely HEVC, may not play in some browsers".to_string());
                    }
                    reasons.push(reason::DIRECT_PLAYABLE.into());

                    let video_type = match container {
                        Container::Mp4 { .. } => VideoType::Mp4,
                        Container::Webm | Container::Ts => VideoType::None,
                    };
                    let mut meta =
                        direct_meta(raw, DeliveryType::FileDirect, video_type, reasons);
                    meta.container_hint = Some(container.kind().to_string());
                    meta.codec_warning = codec_warning;
                    meta.probe = summary;
                    meta
                }
                None => self.proxy_meta(
                    raw,
                    vec![reason::HEAD_SUCCESS.into(), reason::FALLBACK_PROXY.into()],
                    summary,
                ),
            },
        }
    }

    fn proxy_meta(&self, raw: &str, reasons: Vec<String>, summary: ProbeSummary) -> VideoMeta {
        VideoMeta {
            original_url: raw.to_string(),
            playback_url: proxy_url(&self.proxy_path, raw),
            delivery_type: DeliveryType::FileProxy,
            video_type: VideoType::Mp4,
            container_hint: None,
            codec_warning: None,
            requires_proxy: true,
            decision_reasons: reasons,
            probe: summary,
            timestamp: Utc::now(),
        }
    }

    /// Rewrite a stored meta to proxy delivery, keeping its history.
    #[must_use]
    pub fn to_proxy(&self, meta: &VideoMeta) -> VideoMeta {
        let mut reasons = meta.decision_reasons.clone();
        reasons.push(reason::FALLBACK_PROXY.into());
        VideoMeta {
            playback_url: proxy_url(&self.proxy_path, &meta.original_url),
            delivery_type: DeliveryType::FileProxy,
            requires_proxy: true,
            decision_reasons: reasons,
            timestamp: Utc::now(),
            ..meta.clone()
        }
    }
}

fn direct_meta(
    raw: &str,
    delivery_type: DeliveryType,
    video_type: VideoType,
    reasons: Vec<String>,
) -> VideoMeta {
    VideoMeta {
        original_url: raw.to_string(),
        playback_url: raw.to_string(),
        delivery_type,
        video_type,
        container_hint: None,
        codec_warning: None,
        requires_proxy: false,
        decision_reasons: reasons,
        probe: ProbeSummary::default(),
        timestamp: Utc::now(),
    }
}

fn proxy_url(proxy_path: &str, raw: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(raw.as_bytes()).collect();
    format!("{proxy_path}?url={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new(&Config::default_for_test()).unwrap()
    }

    fn head(status: u16, content_type: Option<&str>) -> HeadOutcome {
        HeadOutcome::Response(HeadProbe {
            status,
            content_type: content_type.map(str::to_string),
            accept_ranges: Some("bytes".into()),
        })
    }

    #[test]
    fn test_classify_youtube_hosts() {
        for url in [
            "https://www.youtube.com/watch?v=abc123",
            "https://youtube.com/watch?v=abc123",
            "https://m.youtube.com/watch?v=abc123",
            "https://youtu.be/abc123",
        ] {
            assert_eq!(classify(&Url::parse(url).unwrap()), Classification::Youtube);
        }
        assert_eq!(
            classify(&Url::parse("https://notyoutube.com/v").unwrap()),
            Classification::File
        );
        // Suffix spoofing must not match
        assert_eq!(
            classify(&Url::parse("https://fakeyoutu.be.evil.com/v").unwrap()),
            Classification::File
        );
    }

    #[test]
    fn test_classify_hls_by_path() {
        assert_eq!(
            classify(&Url::parse("https://cdn.example.com/live/master.m3u8").unwrap()),
            Classification::Hls
        );
        assert_eq!(
            classify(&Url::parse("https://cdn.example.com/live/Master.M3U8?tok=1").unwrap()),
            Classification::Hls
        );
        assert_eq!(
            classify(&Url::parse("https://cdn.example.com/file.mp4").unwrap()),
            Classification::File
        );
    }

    #[tokio::test]
    async fn test_resolve_youtube_needs_no_probe() {
        let meta = resolver()
            .resolve("https://www.youtube.com/watch?v=abc123")
            .await;
        assert_eq!(meta.delivery_type, DeliveryType::Youtube);
        assert_eq!(meta.video_type, VideoType::Youtube);
        assert!(!meta.requires_proxy);
        assert_eq!(meta.playback_url, meta.original_url);
        assert_eq!(meta.decision_reasons, vec![reason::YOUTUBE_DETECTED]);
    }

    #[tokio::test]
    async fn test_resolve_hls_manifest() {
        let meta = resolver()
            .resolve("https://cdn.example.com/master.m3u8")
            .await;
        assert_eq!(meta.delivery_type, DeliveryType::Hls);
        assert_eq!(meta.video_type, VideoType::M3u8);
        assert_eq!(meta.decision_reasons, vec![reason::HLS_MANIFEST]);
    }

    #[test]
    fn test_head_access_denied_falls_back_to_proxy() {
        let resolver = resolver();
        let url = "https://cdn.example.com/file.mp4";
        let HeadDecision::Settled(meta) = resolver.after_head(url, &head(403, None)) else {
            panic!("403 should settle");
        };

        assert_eq!(meta.delivery_type, DeliveryType::FileProxy);
        assert!(meta.requires_proxy);
        assert!(meta
            .decision_reasons
            .contains(&reason::HEAD_ACCESS_DENIED.to_string()));
        assert!(meta.playback_url.starts_with("/api/video-proxy?url="));
        assert!(meta.playback_url.contains("https%3A%2F%2Fcdn.example.com"));
    }

    #[test]
    fn test_head_non_200_falls_back_to_proxy() {
        let resolver = resolver();
        let HeadDecision::Settled(meta) =
            resolver.after_head("https://x.example/v.mp4", &head(500, None))
        else {
            panic!("500 should settle");
        };
        assert_eq!(meta.delivery_type, DeliveryType::FileProxy);
        assert!(meta
            .decision_reasons
            .contains(&reason::HEAD_NON_200.to_string()));
    }

    #[test]
    fn test_video_content_type_goes_direct() {
        let resolver = resolver();
        let HeadDecision::Settled(meta) =
            resolver.after_head("https://x.example/v.mp4", &head(200, Some("video/mp4")))
        else {
            panic!("video/* should settle");
        };
        assert_eq!(meta.delivery_type, DeliveryType::FileDirect);
        assert_eq!(meta.video_type, VideoType::Mp4);
        assert!(!meta.requires_proxy);
        assert!(meta
            .decision_reasons
            .contains(&reason::DIRECT_PLAYABLE.to_string()));
        assert_eq!(meta.probe.status, 200);
    }

    #[test]
    fn test_non_mp4_video_content_type_has_no_video_type() {
        let resolver = resolver();
        let HeadDecision::Settled(meta) =
            resolver.after_head("https://x.example/v.webm", &head(200, Some("video/webm")))
        else {
            panic!();
        };
        assert_eq!(meta.delivery_type, DeliveryType::FileDirect);
        assert_eq!(meta.video_type, VideoType::None);
    }

    #[test]
    fn test_ambiguous_content_type_requests_range_probe() {
        let resolver = resolver();
        assert!(matches!(
            resolver.after_head(
                "https://x.example/v",
                &head(200, Some("application/octet-stream"))
            ),
            HeadDecision::NeedRange(_)
        ));
        assert!(matches!(
            resolver.after_head("https://x.example/v", &head(206, None)),
            HeadDecision::NeedRange(_)
        ));
    }

    #[test]
    fn test_non_video_content_type_falls_back_to_proxy() {
        let resolver = resolver();
        let HeadDecision::Settled(meta) =
            resolver.after_head("https://x.example/v", &head(200, Some("text/html")))
        else {
            panic!();
        };
        assert_eq!(meta.delivery_type, DeliveryType::FileProxy);
    }

    #[test]
    fn test_range_denied_falls_back_to_proxy() {
        let resolver = resolver();
        let meta = resolver.after_range(
            "https://x.example/v",
            ProbeSummary::default(),
            &RangeOutcome::Denied,
        );
        assert_eq!(meta.delivery_type, DeliveryType::FileProxy);
        assert!(meta
            .decision_reasons
            .contains(&reason::RANGE_ACCESS_DENIED.to_string()));
    }

    #[test]
    fn test_sniffed_mp4_goes_direct() {
        let resolver = resolver();
        let mut bytes = 20u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ftypisomiso2");
        let meta = resolver.after_range(
            "https://x.example/v",
            ProbeSummary::default(),
            &RangeOutcome::Bytes(bytes),
        );

        assert_eq!(meta.delivery_type, DeliveryType::FileDirect);
        assert_eq!(meta.video_type, VideoType::Mp4);
        assert_eq!(meta.container_hint.as_deref(), Some("mp4"));
        assert!(meta.codec_warning.is_none());
        assert!(meta
            .decision_reasons
            .contains(&"container-mp4".to_string()));
    }

    #[test]
    fn test_sniffed_hevc_attaches_codec_warning() {
        let resolver = resolver();
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ftyphvc1");
        let meta = resolver.after_range(
            "https://x.example/v",
            ProbeSummary::default(),
            &RangeOutcome::Bytes(bytes),
        );

        assert_eq!(meta.delivery_type, DeliveryType::FileDirect);
        assert_eq!(
            meta.codec_warning.as_deref(),
            Some("likely HEVC, may not play in some browsers")
        );
        assert!(meta
            .decision_reasons
            .contains(&reason::CODEC_WARNING.to_string()));
    }

    #[test]
    fn test_unrecognized_bytes_fall_back_to_proxy() {
        let resolver = resolver();
        let meta = resolver.after_range(
            "https://x.example/v",
            ProbeSummary::default(),
            &RangeOutcome::Bytes(b"<!DOCTYPE html>".to_vec()),
        );
        assert_eq!(meta.delivery_type, DeliveryType::FileProxy);
        assert!(meta
            .decision_reasons
            .contains(&reason::FALLBACK_PROXY.to_string()));
    }

    #[test]
    fn test_to_proxy_preserves_history() {
        let resolver = resolver();
        let direct = direct_meta(
            "https://x.example/v.mp4",
            DeliveryType::FileDirect,
            VideoType::Mp4,
            vec![reason::DIRECT_PLAYABLE.into()],
        );

        let flipped = resolver.to_proxy(&direct);
        assert_eq!(flipped.delivery_type, DeliveryType::FileProxy);
        assert!(flipped.requires_proxy);
        assert_eq!(flipped.original_url, direct.original_url);
        assert!(flipped.playback_url.starts_with("/api/video-proxy?url="));
        assert!(flipped
            .decision_reasons
            .contains(&reason::DIRECT_PLAYABLE.to_string()));
        assert!(flipped
            .decision_reasons
            .contains(&reason::FALLBACK_PROXY.to_string()));
    }
}
