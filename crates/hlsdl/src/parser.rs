//! Thin adapter over `m3u8_rs` that flattens a playlist document into the
//! shape the resolver works with: a list of variant playlists and a list of
//! media segments, either of which may be empty.

use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, Playlist, QuotedOrUnquoted};
use serde::Serialize;
use tracing::{debug, trace};

use crate::HlsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlaylist {
    /// Value of the `NAME` attribute, if the stream carries one
    pub name: Option<String>,
    pub resolution: Option<Resolution>,
    pub bandwidth: u64,
    /// URI as written in the manifest, possibly relative
    pub uri: String,
}

/// A byte range with its offset made explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentByteRange {
    pub offset: u64,
    pub length: u64,
}

impl SegmentByteRange {
    /// Value for an HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        let last = (self.offset + self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, last)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
    pub uri: String,
    pub duration: f32,
    pub title: Option<String>,
    pub byte_range: Option<SegmentByteRange>,
    pub discontinuity: bool,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedManifest {
    pub playlists: Vec<ParsedPlaylist>,
    pub segments: Vec<ParsedSegment>,
    /// Whether the document declared `EXT-X-ENDLIST`
    pub end_list: bool,
}

pub fn parse_manifest(input: &[u8]) -> Result<ParsedManifest, HlsError> {
    let text = std::str::from_utf8(input)
        .map_err(|e| HlsError::manifest_parse(format!("manifest is not valid UTF-8: {e}")))?;
    // m3u8-rs rejects a leading byte order mark
    let text = text.trim_start_matches('\u{feff}');
    if !text.trim_start().starts_with("#EXTM3U") {
        return Err(HlsError::manifest_parse("missing #EXTM3U header"));
    }

    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(from_master(master)),
        Ok(Playlist::MediaPlaylist(media)) => Ok(from_media(media)),
        Err(e) => Err(HlsError::manifest_parse(format!(
            "failed to parse playlist: {e}"
        ))),
    }
}

fn from_master(master: MasterPlaylist) -> ParsedManifest {
    let playlists: Vec<ParsedPlaylist> = master
        .variants
        .into_iter()
        .filter(|variant| !variant.is_i_frame)
        .map(|variant| {
            let name = variant
                .other_attributes
                .as_ref()
                .and_then(|attrs| attrs.get("NAME"))
                .map(|value| match value {
                    QuotedOrUnquoted::Quoted(s) | QuotedOrUnquoted::Unquoted(s) => s.clone(),
                });
            ParsedPlaylist {
                name,
                resolution: variant.resolution.map(|r| Resolution {
                    width: r.width,
                    height: r.height,
                }),
                bandwidth: variant.bandwidth,
                uri: variant.uri,
            }
        })
        .collect();

    debug!(variants = playlists.len(), "Parsed master playlist");
    ParsedManifest {
        playlists,
        segments: Vec::new(),
        end_list: true,
    }
}

fn from_media(media: MediaPlaylist) -> ParsedManifest {
    let mut segments = Vec::with_capacity(media.segments.len());
    // (uri, end offset) of the previous sub-range, used when an offset is omitted
    let mut previous_range: Option<(String, u64)> = None;
    let mut encrypted = false;

    for segment in media.segments {
        if let Some(key) = &segment.key {
            encrypted = !matches!(key.method, KeyMethod::None);
        }

        if segment.uri.trim().is_empty() {
            trace!("Skipping segment without URI");
            continue;
        }

        let byte_range = segment.byte_range.as_ref().map(|range| {
            let offset = range.offset.unwrap_or_else(|| match &previous_range {
                Some((uri, end)) if *uri == segment.uri => *end,
                _ => 0,
            });
            SegmentByteRange {
                offset,
                length: range.length,
            }
        });
        previous_range = byte_range.map(|r| (segment.uri.clone(), r.offset + r.length));

        segments.push(ParsedSegment {
            uri: segment.uri,
            duration: segment.duration,
            title: segment.title,
            byte_range,
            discontinuity: segment.discontinuity,
            encrypted,
        });
    }

    debug!(
        segments = segments.len(),
        end_list = media.end_list,
        "Parsed media playlist"
    );
    ParsedManifest {
        playlists: Vec::new(),
        segments,
        end_list: media.end_list,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_playlist_yields_variants_without_iframe_streams() {
        let input = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,NAME=\"720\"\n\
720/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=842x480\n\
480/index.m3u8\n\
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"iframe.m3u8\"\n";

        let parsed = parse_manifest(input.as_bytes()).unwrap();
        assert!(parsed.segments.is_empty());
        assert_eq!(parsed.playlists.len(), 2);
        assert_eq!(parsed.playlists[0].name.as_deref(), Some("720"));
        assert_eq!(parsed.playlists[0].bandwidth, 2_800_000);
        assert_eq!(parsed.playlists[1].name, None);
        assert_eq!(
            parsed.playlists[1].resolution,
            Some(Resolution {
                width: 842,
                height: 480
            })
        );
        assert_eq!(parsed.playlists[1].uri, "480/index.m3u8");
    }

    #[test]
    fn media_playlist_keeps_source_order_and_attributes() {
        let input = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,first\na.ts\n#EXTINF:6.0,\nb.ts\n#EXT-X-DISCONTINUITY\n#EXTINF:4.5,\nc.ts\n#EXT-X-ENDLIST\n";

        let parsed = parse_manifest(input.as_bytes()).unwrap();
        assert!(parsed.playlists.is_empty());
        assert!(parsed.end_list);
        let uris: Vec<_> = parsed.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["a.ts", "b.ts", "c.ts"]);
        assert_eq!(parsed.segments[0].title.as_deref(), Some("first"));
        assert!(parsed.segments[2].discontinuity);
        assert!((parsed.segments[2].duration - 4.5).abs() < f32::EPSILON);
    }

    #[test]
    fn byte_range_offsets_are_inferred() {
        let input = "#EXTM3U\n#EXT-X-VERSION:4\n#EXT-X-TARGETDURATION:2\n\
#EXTINF:2.0,\n#EXT-X-BYTERANGE:100@0\nfile.ts\n\
#EXTINF:2.0,\n#EXT-X-BYTERANGE:50\nfile.ts\n\
#EXTINF:2.0,\n#EXT-X-BYTERANGE:30\nother.ts\n#EXT-X-ENDLIST\n";

        let parsed = parse_manifest(input.as_bytes()).unwrap();
        let ranges: Vec<_> = parsed.segments.iter().map(|s| s.byte_range).collect();
        assert_eq!(
            ranges,
            [
                Some(SegmentByteRange {
                    offset: 0,
                    length: 100
                }),
                Some(SegmentByteRange {
                    offset: 100,
                    length: 50
                }),
                Some(SegmentByteRange {
                    offset: 0,
                    length: 30
                }),
            ]
        );
        assert_eq!(ranges[1].unwrap().header_value(), "bytes=100-149");
    }

    #[test]
    fn encrypted_segments_are_flagged() {
        let input = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n\
#EXTINF:2.0,\nclear.ts\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:2.0,\nsecret.ts\n#EXT-X-ENDLIST\n";

        let parsed = parse_manifest(input.as_bytes()).unwrap();
        assert!(!parsed.segments[0].encrypted);
        assert!(parsed.segments[1].encrypted);
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let input =
            "\u{feff}#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\na.ts\n#EXT-X-ENDLIST\n";

        let parsed = parse_manifest(input.as_bytes()).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].uri, "a.ts");
    }

    #[test]
    fn non_playlist_input_is_rejected() {
        let result = parse_manifest(b"<html>not found</html>");
        assert!(matches!(result, Err(HlsError::ManifestParse { .. })));
    }
}
