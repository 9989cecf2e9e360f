//! HTML fragments
//!
//! The page is a static shell; the now-playing widget is swapped in by the
//! SSE stream, search results and add buttons by small fetch calls. Every
//! fragment that travels over SSE is a single line so it fits one `data:`
//! field.

use jukebox_common::models::{SearchResult, Song};
use jukebox_common::time::format_duration_ms;
use jukebox_common::NowPlaying;

const INDEX_TEMPLATE: &str = include_str!("index.html");

/// Full page shell
pub fn index_page() -> String {
    INDEX_TEMPLATE.to_string()
}

/// Section wrapper used for the initial (non-streamed) render
pub fn now_playing_section(now_playing: Option<&NowPlaying>) -> String {
    format!(
        r#"<section id="now-playing-section"><h2>Now playing</h2><div id="now-playing" data-live="/now-playing-live">{}</div></section>"#,
        now_playing_widget(now_playing)
    )
}

/// Inner widget, re-rendered for every live update
pub fn now_playing_widget(now_playing: Option<&NowPlaying>) -> String {
    let Some((np, song)) = now_playing.and_then(|np| np.song.as_ref().map(|s| (np, s))) else {
        return r#"<div class="now-playing idle">Nothing is playing right now.</div>"#.to_string();
    };

    let state = if np.playing { "playing" } else { "paused" };
    let cover = song
        .album
        .cover_for_width(300)
        .map(|c| {
            format!(
                r#"<img class="cover" src="{}" alt="{}">"#,
                escape(&c.url),
                escape(&song.album.name)
            )
        })
        .unwrap_or_default();

    format!(
        concat!(
            r#"<div class="now-playing {state}">{cover}"#,
            r#"<div class="meta"><div class="title">{title}</div>"#,
            r#"<div class="artists">{artists}</div><div class="album">{album}</div>"#,
            r#"<progress max="1000" value="{progress}"></progress>"#,
            r#"<div class="time">{position} / {duration}</div></div></div>"#,
        ),
        state = state,
        cover = cover,
        title = escape(&song.name),
        artists = escape(&song.artist_line()),
        album = escape(&song.album.name),
        progress = (np.progress_fraction() * 1000.0).round() as u32,
        position = format_duration_ms(np.progress_ms),
        duration = format_duration_ms(song.duration_ms),
    )
}

/// Search result list with one add button per song
pub fn search_results(result: &SearchResult) -> String {
    if result.tracks.songs.is_empty() {
        return r#"<ul class="results empty"><li>No songs found.</li></ul>"#.to_string();
    }
    let items: String = result.tracks.songs.iter().map(search_result_item).collect();
    format!(r#"<ul class="results">{}</ul>"#, items)
}

fn search_result_item(song: &Song) -> String {
    format!(
        concat!(
            r#"<li><span class="title">{title}</span> <span class="artists">{artists}</span> "#,
            r#"<span class="time">{duration}</span> "#,
            r#"<button class="add" data-song="{uri}">Add</button></li>"#,
        ),
        title = escape(&song.name),
        artists = escape(&song.artist_line()),
        duration = format_duration_ms(song.duration_ms),
        uri = escape(&song.uri),
    )
}

/// Replacement for an add button once the song was queued
pub fn disabled_button() -> String {
    r#"<button class="add" disabled>Added</button>"#.to_string()
}

/// Escape text for use in HTML element content and quoted attributes
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_common::models::{Album, Artist, CoverImage, PlayingType, SearchResultTracks};

    fn song(name: &str) -> Song {
        Song {
            id: "id".to_string(),
            name: name.to_string(),
            kind: "track".to_string(),
            uri: "spotify:track:id".to_string(),
            album: Album {
                name: "Album".to_string(),
                cover_images: vec![CoverImage {
                    height: 300,
                    width: 300,
                    url: "https://i.scdn.co/300".to_string(),
                }],
                ..Album::default()
            },
            artists: vec![
                Artist { name: "First".to_string(), ..Artist::default() },
                Artist { name: "Second".to_string(), ..Artist::default() },
            ],
            duration_ms: 200_000,
        }
    }

    fn playing(name: &str) -> NowPlaying {
        NowPlaying {
            last_change: 0,
            progress_ms: 50_000,
            kind: PlayingType::Track,
            playing: true,
            song: Some(song(name)),
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape("two\nlines"), "two lines");
    }

    #[test]
    fn test_widget_renders_song() {
        let html = now_playing_widget(Some(&playing("Song")));
        assert!(html.contains(r#"class="now-playing playing""#));
        assert!(html.contains("Song"));
        assert!(html.contains("First, Second"));
        assert!(html.contains(r#"value="250""#));
        assert!(html.contains("0:50 / 3:20"));
        assert!(html.contains("https://i.scdn.co/300"));
        assert!(!html.contains('\n'));
    }

    #[test]
    fn test_widget_escapes_song_name() {
        let html = now_playing_widget(Some(&playing("<script>alert(1)</script>")));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_widget_idle_without_song() {
        assert!(now_playing_widget(None).contains("Nothing is playing"));
        let mut advert = playing("x");
        advert.song = None;
        assert!(now_playing_widget(Some(&advert)).contains("Nothing is playing"));
    }

    #[test]
    fn test_section_wraps_widget() {
        let html = now_playing_section(None);
        assert!(html.starts_with(r#"<section id="now-playing-section">"#));
        assert!(html.contains("Nothing is playing"));
    }

    #[test]
    fn test_search_results() {
        let result = SearchResult {
            tracks: SearchResultTracks { songs: vec![song("One"), song("Two")] },
        };
        let html = search_results(&result);
        assert_eq!(html.matches("<li>").count(), 2);
        assert!(html.contains(r#"data-song="spotify:track:id""#));

        assert!(search_results(&SearchResult::default()).contains("No songs found"));
    }

    #[test]
    fn test_index_page_hooks_up_live_stream() {
        let html = index_page();
        assert!(html.contains("/now-playing-live"));
        assert!(html.contains("/search"));
    }
}
