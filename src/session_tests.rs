//! Tests for session lifecycle, edits, queries and snapshots

#[cfg(test)]
mod tests {
    use crate::categories::{CategorySelection, ChannelFilter};
    use crate::config::ParseConfig;
    use crate::error::Error;
    use crate::m3u_parser::{parse_m3u_chunked, parse_m3u_playlist};
    use crate::session::*;
    use crate::store::JsonStore;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    const PLAYLIST: &str = r#"#EXTM3U x-tvg-url="http://example.com/guide.xml"
#EXTINF:-1 tvg-id="bbc1.uk" group-title="UK",BBC One
http://example.com/bbc1.m3u8
#EXTINF:-1 group-title="News",CNN
http://example.com/cnn.m3u8
#EXTINF:-1 group-title="News",Sky News
http://example.com/sky.m3u8
"#;

    const GUIDE: &str = r#"<tv>
  <programme channel="bbc1.uk" start="20250101120000 +0000" stop="20250101130000 +0000"><title>News at Noon</title></programme>
  <programme channel="cnn" start="20250101120000 +0000" stop="20250101140000 +0000"><title>Newsroom</title></programme>
  <programme channel="Sky_News" start="20250101100000 +0000" stop="20250101110000 +0000"><title>Morning</title></programme>
</tv>"#;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    async fn loaded() -> Session {
        let mut session = Session::new(ParseConfig::default());
        session.load_playlist(PLAYLIST, "Test", "list.m3u", |_| {}).await.unwrap();
        session.load_guide(GUIDE, "guide.xml", |_| {}).await.unwrap();
        session
    }

    fn id_of(session: &Session, name: &str) -> String {
        session.find_channel(name).unwrap().id.clone()
    }

    #[tokio::test]
    async fn test_load_playlist_replaces_wholesale() {
        let mut session = Session::new(ParseConfig::default());
        let info = session.load_playlist(PLAYLIST, "Test", "list.m3u", |_| {}).await.unwrap();

        assert_eq!(info.channel_count, 3);
        assert_eq!(info.guide_url.as_deref(), Some("http://example.com/guide.xml"));
        assert_eq!(session.channels().len(), 3);

        session
            .load_playlist("#EXTINF:-1,Only\nhttp://example.com/only.ts\n", "Second", "b.m3u", |_| {})
            .await
            .unwrap();
        assert_eq!(session.channels().len(), 1);
        assert_eq!(session.playlist_info().unwrap().name, "Second");
    }

    #[tokio::test]
    async fn test_empty_playlist_keeps_state() {
        let mut session = loaded().await;
        let err = session.load_playlist("#EXTM3U\n", "Empty", "e.m3u", |_| {}).await.unwrap_err();

        assert!(matches!(err, Error::NoChannels));
        assert!(err.is_empty_result());
        assert!(!err.is_fetch_failure());
        assert_eq!(session.channels().len(), 3);
        assert_eq!(session.playlist_info().unwrap().name, "Test");
    }

    #[tokio::test]
    async fn test_empty_guide_keeps_state() {
        let mut session = loaded().await;
        let err = session.load_guide("<tv></tv>", "empty.xml", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::NoProgrammes));
        assert_eq!(session.guide_info().unwrap().source, "guide.xml");
        assert_eq!(session.epg().unwrap().channel_count(), 3);

        let err = session.load_guide("<tv><programme></tv>", "broken.xml", |_| {}).await.unwrap_err();
        assert!(err.is_empty_result());
    }

    #[tokio::test]
    async fn test_new_load_supersedes_in_flight() {
        let mut session = Session::new(ParseConfig::default());
        let stale = session.begin_playlist_load();
        let current = session.begin_playlist_load();
        assert!(stale.is_cancelled());
        assert!(!current.is_cancelled());

        let result = parse_m3u_chunked(PLAYLIST, 100, &stale, |_| {}).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        // A stale result that finished anyway is refused
        let late = parse_m3u_playlist(PLAYLIST);
        assert!(matches!(
            session.commit_playlist(&stale, late, "Stale", "a.m3u"),
            Err(Error::Cancelled)
        ));
        assert!(session.channels().is_empty());

        let fresh = parse_m3u_playlist(PLAYLIST);
        session.commit_playlist(&current, fresh, "Fresh", "b.m3u").unwrap();
        assert_eq!(session.playlist_info().unwrap().name, "Fresh");
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let mut session = Session::new(ParseConfig::default());
        let playlist = session.begin_playlist_load();
        let guide = session.begin_guide_load();

        session.cancel_guide_load();
        assert!(guide.is_cancelled());
        assert!(!playlist.is_cancelled());

        session.cancel_playlist_load();
        assert!(playlist.is_cancelled());
    }

    #[tokio::test]
    async fn test_playlist_and_guide_loads_are_independent() {
        let mut session = Session::new(ParseConfig::default());
        let playlist = session.begin_playlist_load();
        let guide = session.begin_guide_load();
        assert!(!playlist.is_cancelled());
        assert!(!guide.is_cancelled());
    }

    #[tokio::test]
    async fn test_now_playing_prefers_epg_id_then_name() {
        let session = loaded().await;
        let bbc = id_of(&session, "BBC One");
        let cnn = id_of(&session, "CNN");
        let sky = id_of(&session, "Sky News");

        let now = at(12, 30);
        assert_eq!(session.now_playing(&bbc, now).unwrap().unwrap().title, "News at Noon");
        assert_eq!(session.now_playing(&cnn, now).unwrap().unwrap().title, "Newsroom");
        assert!(session.now_playing(&sky, now).unwrap().is_none());
        assert!(session.now_playing(&bbc, at(13, 0)).unwrap().is_none());
        assert!(matches!(session.now_playing("nope", now), Err(Error::ChannelNotFound(_))));

        assert_eq!(session.find_current_program("Sky News", at(10, 15)).unwrap().title, "Morning");
    }

    #[tokio::test]
    async fn test_now_playing_without_guide() {
        let mut session = Session::new(ParseConfig::default());
        session.load_playlist(PLAYLIST, "Test", "list.m3u", |_| {}).await.unwrap();
        let bbc = id_of(&session, "bbc one");
        assert!(session.now_playing(&bbc, at(12, 30)).unwrap().is_none());
        assert!(session.find_current_program("BBC One", at(12, 30)).is_none());
    }

    #[tokio::test]
    async fn test_favorites_tally_and_filter() {
        let mut session = loaded().await;
        let cnn = id_of(&session, "CNN");

        assert!(session.toggle_favorite(&cnn));
        assert!(session.is_favorite(&cnn));

        let tally = session.tally();
        assert_eq!(tally.get("all"), 3);
        assert_eq!(tally.get("favorites"), 1);
        assert_eq!(tally.get("News"), 2);

        let token = CancellationToken::new();
        assert_eq!(session.tally_chunked(&token, |_| {}).await.unwrap(), tally);

        let favs = session.filtered(&ChannelFilter::new(CategorySelection::Favorites));
        assert_eq!(favs.len(), 1);
        let search = session.filtered(&ChannelFilter::default().with_search("sky"));
        assert_eq!(search[0].name, "Sky News");

        assert!(!session.toggle_favorite(&cnn));
        assert_eq!(session.tally().favorites(), 0);
    }

    #[tokio::test]
    async fn test_export_selection() {
        let mut session = loaded().await;
        let sky = id_of(&session, "Sky News");
        session.toggle_favorite(&sky);

        let all = session.export_m3u(&CategorySelection::All);
        assert_eq!(all.matches("#EXTINF").count(), 3);

        let favs = session.export_m3u(&CategorySelection::Favorites);
        assert_eq!(favs.matches("#EXTINF").count(), 1);
        assert!(favs.contains(",Sky News\n"));

        let uk = session.export_m3u(&CategorySelection::Group("UK".to_string()));
        assert!(uk.contains("tvg-id=\"bbc1.uk\""));
        assert_eq!(uk.matches("#EXTINF").count(), 1);
    }

    #[tokio::test]
    async fn test_update_stream_url_keeps_id() {
        let mut session = loaded().await;
        let cnn = id_of(&session, "CNN");
        session.toggle_favorite(&cnn);

        session.update_stream_url(&cnn, " rtmp://live.example.org/cnn ").unwrap();
        let channel = session.channel(&cnn).unwrap();
        assert_eq!(channel.stream_url, "rtmp://live.example.org/cnn");
        assert!(session.is_favorite(&cnn));

        assert!(matches!(
            session.update_stream_url(&cnn, "ftp://example.com/x"),
            Err(Error::InvalidStreamUrl(_))
        ));
        assert!(matches!(
            session.update_stream_url("missing", "http://example.com/x"),
            Err(Error::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_channels_from_guide() {
        let mut session = loaded().await;

        assert_eq!(session.channels_from_guide(true).unwrap(), 3);
        assert_eq!(session.channels().len(), 6);

        assert_eq!(session.channels_from_guide(false).unwrap(), 3);
        let names: Vec<_> = session.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Sky News", "Bbc1.Uk", "Cnn"]);
        assert_eq!(session.playlist_info().unwrap().source, GENERATED_PLAYLIST_SOURCE);

        // Guide-derived channels resolve through their guide key
        let sky = id_of(&session, "Sky News");
        assert_eq!(session.now_playing(&sky, at(10, 30)).unwrap().unwrap().title, "Morning");

        session.clear_guide();
        assert!(matches!(session.channels_from_guide(false), Err(Error::NoProgrammes)));
    }

    #[tokio::test]
    async fn test_clear_lifecycles() {
        let mut session = loaded().await;
        let cnn = id_of(&session, "CNN");
        session.toggle_favorite(&cnn);

        session.clear_channels();
        assert!(session.channels().is_empty());
        assert!(session.favorites().is_empty());
        assert!(session.playlist_info().is_none());
        assert!(session.epg().is_some());

        session.clear_guide();
        assert!(session.epg().is_none());
        assert!(session.guide_info().is_none());

        let mut session = loaded().await;
        session.clear_all();
        assert!(session.channels().is_empty());
        assert!(session.epg().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let mut session = loaded().await;
        let cnn = id_of(&session, "CNN");
        session.toggle_favorite(&cnn);
        session.save_to(&store).unwrap();

        let mut restored = Session::new(ParseConfig::default());
        restored.restore_from(&store);

        assert_eq!(restored.channels(), session.channels());
        assert!(restored.is_favorite(&cnn));
        assert_eq!(restored.epg(), session.epg());
        assert_eq!(restored.playlist_info(), session.playlist_info());
        assert_eq!(restored.guide_info(), session.guide_info());
    }

    #[tokio::test]
    async fn test_snapshot_after_clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let mut session = loaded().await;
        session.save_to(&store).unwrap();
        session.clear_guide();
        session.save_to(&store).unwrap();

        let mut restored = Session::new(ParseConfig::default());
        restored.restore_from(&store);
        assert_eq!(restored.channels().len(), 3);
        assert!(restored.epg().is_none());
    }

    #[test]
    fn test_restore_skips_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("iptv_channels.json"), "not json").unwrap();
        std::fs::write(dir.path().join("iptv_favorites.json"), r#"["a","b"]"#).unwrap();

        let mut session = Session::new(ParseConfig::default());
        session.restore_from(&JsonStore::new(dir.path()));
        assert!(session.channels().is_empty());
        assert_eq!(session.favorites().len(), 2);
    }
}
