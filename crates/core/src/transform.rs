use crate::model::{PlayableItem, Track, TrackOrigin};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone)]
pub struct SourceResolver {
    base_url: Url,
    media_dir: PathBuf,
}

impl SourceResolver {
    pub fn new(base_url: &str, media_dir: impl Into<PathBuf>) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            media_dir: media_dir.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn stream_url(&self, id: &str) -> String {
        let encoded = utf8_percent_encode(id, NON_ALPHANUMERIC).to_string();
        self.remote(&format!("tracks/{encoded}/stream"))
    }

    pub fn remote(&self, reference: &str) -> String {
        if Url::parse(reference).is_ok() {
            return reference.to_string();
        }
        match self.base_url.join(reference.trim_start_matches('/')) {
            Ok(url) => url.to_string(),
            Err(_) => reference.to_string(),
        }
    }

    pub fn local(&self, reference: &str) -> String {
        let path = Path::new(reference);
        if path.is_absolute() {
            reference.to_string()
        } else {
            self.media_dir.join(path).to_string_lossy().into_owned()
        }
    }

    fn local_file_name(id: &str) -> String {
        id.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

pub fn to_playable_source(track: &Track, is_local: bool, resolver: &SourceResolver) -> PlayableItem {
    let url = match (is_local, track.source_url.is_empty()) {
        (true, true) => resolver.local(&SourceResolver::local_file_name(&track.id)),
        (true, false) => resolver.local(&track.source_url),
        (false, true) => resolver.stream_url(&track.id),
        (false, false) => resolver.remote(&track.source_url),
    };

    let artwork = if track.icon.is_empty() {
        None
    } else if is_local {
        Some(resolver.local(&track.icon))
    } else {
        Some(resolver.remote(&track.icon))
    };

    PlayableItem {
        id: Some(track.id.clone()),
        url,
        title: Some(track.title.clone()),
        artist: Some(track.artist.clone()),
        artwork,
        duration: Some(track.duration),
        is_local,
    }
}

pub fn from_playable_item(item: &PlayableItem) -> Track {
    Track {
        id: item.id.clone().unwrap_or_default(),
        title: item.title.clone().unwrap_or_default(),
        artist: item.artist.clone().unwrap_or_default(),
        icon: item.artwork.clone().unwrap_or_default(),
        source_url: item.url.clone(),
        duration: item.duration.unwrap_or(0.0),
        origin: if item.is_local {
            TrackOrigin::Downloaded
        } else {
            TrackOrigin::Remote
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{from_playable_item, to_playable_source, SourceResolver};
    use crate::model::{PlayableItem, Track, TrackOrigin};

    fn resolver() -> SourceResolver {
        SourceResolver::new("https://music.example.com/api", "/data/media").unwrap()
    }

    fn track(source_url: &str, icon: &str) -> Track {
        Track {
            id: "abc 1".to_string(),
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            icon: icon.to_string(),
            source_url: source_url.to_string(),
            duration: 215.0,
            origin: TrackOrigin::Remote,
        }
    }

    #[test]
    fn remote_references_resolve_against_base_url() {
        let item = to_playable_source(&track("/files/a.mp3", "art/a.jpg"), false, &resolver());

        assert_eq!(item.url, "https://music.example.com/api/files/a.mp3");
        assert_eq!(
            item.artwork.as_deref(),
            Some("https://music.example.com/api/art/a.jpg")
        );
        assert_eq!(item.id.as_deref(), Some("abc 1"));
        assert_eq!(item.duration, Some(215.0));
        assert!(!item.is_local);
    }

    #[test]
    fn missing_remote_source_falls_back_to_stream_endpoint() {
        let item = to_playable_source(&track("", ""), false, &resolver());

        assert_eq!(
            item.url,
            "https://music.example.com/api/tracks/abc%201/stream"
        );
        assert_eq!(item.artwork, None);
    }

    #[test]
    fn absolute_urls_are_kept() {
        let item = to_playable_source(
            &track("https://cdn.example.com/x.flac", ""),
            false,
            &resolver(),
        );
        assert_eq!(item.url, "https://cdn.example.com/x.flac");
    }

    #[test]
    fn local_references_resolve_into_media_dir() {
        let item = to_playable_source(&track("a.mp3", "a.jpg"), true, &resolver());

        assert!(item.is_local);
        assert!(item.url.ends_with("a.mp3"));
        assert!(item.url.starts_with("/data/media"));
        assert!(item.artwork.unwrap().starts_with("/data/media"));

        let fallback = to_playable_source(&track("", ""), true, &resolver());
        assert!(fallback.url.ends_with("abc_1"));
    }

    #[test]
    fn inverse_mapping_fills_defaults() {
        let item = PlayableItem {
            url: "/data/media/a.mp3".to_string(),
            is_local: true,
            ..PlayableItem::default()
        };

        let track = from_playable_item(&item);
        assert_eq!(track.id, "");
        assert_eq!(track.title, "");
        assert_eq!(track.icon, "");
        assert_eq!(track.duration, 0.0);
        assert_eq!(track.source_url, "/data/media/a.mp3");
        assert_eq!(track.origin, TrackOrigin::Downloaded);
    }
}
