use chipdrive::meta::TrackMeta;

mod common;
use common::gd3_block;

#[test]
fn parses_all_fields() {
    let block = gd3_block(&[
        "Green Hill Zone",
        "グリーンヒル",
        "Sonic",
        "ソニック",
        "Mega Drive",
        "メガドライブ",
        "Masato Nakamura",
        "中村正人",
        "1991-06-23",
        "ripper",
    ]);
    let meta = TrackMeta::try_from(&block[..]).unwrap();
    assert_eq!(meta.track_en, "Green Hill Zone");
    assert_eq!(meta.track_jp, "グリーンヒル");
    assert_eq!(meta.game_en, "Sonic");
    assert_eq!(meta.system_jp, "メガドライブ");
    assert_eq!(meta.author_en, "Masato Nakamura");
    assert_eq!(meta.date, "1991-06-23");
}

#[test]
fn empty_japanese_field_falls_back_to_english() {
    let block = gd3_block(&["Title", "", "Game", "", "System", "", "Author", "", "2001"]);
    let meta = TrackMeta::try_from(&block[..]).unwrap();
    assert_eq!(meta.track_jp, "Title");
    assert_eq!(meta.game_jp, "Game");
    assert_eq!(meta.system_jp, "System");
    assert_eq!(meta.author_jp, "Author");
}

#[test]
fn empty_english_field_falls_back_to_japanese() {
    let block = gd3_block(&["", "タイトル"]);
    let meta = TrackMeta::try_from(&block[..]).unwrap();
    assert_eq!(meta.track_en, "タイトル");
}

#[test]
fn truncated_block_yields_empty_remainder() {
    let mut block = gd3_block(&["Title", "T2", "Game"]);
    // Clip mid-way through the field data; the declared length now lies.
    block.truncate(12 + 8);
    let meta = TrackMeta::try_from(&block[..]).unwrap();
    assert_eq!(meta.date, "");
}

#[test]
fn wrong_tag_is_rejected() {
    let mut block = gd3_block(&["Title"]);
    block[0..4].copy_from_slice(b"Nope");
    assert!(TrackMeta::try_from(&block[..]).is_err());
}

#[test]
fn placeholder_carries_the_filename() {
    let meta = TrackMeta::placeholder("stage1.vgm");
    assert_eq!(meta.track_en, "stage1.vgm");
    assert_eq!(meta.track_jp, "stage1.vgm");
    assert_eq!(meta.game_en, "(no GD3 info)");
    assert!(meta.date.is_empty());
}
