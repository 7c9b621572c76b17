use chrono::{TimeZone, Utc};
use shiplog_rs::model::Step;
use shiplog_rs::parser::{ReleaseRef, VersionBlock, parse_version_block, split_blocks};

fn parsed(text: &str) -> VersionBlock {
    match parse_version_block(text) {
        Step::Done(block) => block,
        other => panic!("expected a version block, got {other:?}"),
    }
}

#[test]
fn parses_header_notes_and_release_lines() {
    let block = parsed(
        "v2.4.0 (14h50, 2024-01-05)\n\
         Faster checkout\n\
         Fix login redirect\n\
         Version\n\
         https://github.com/acme/widget/releases/tag/v2.4.0\n\
         \n\
         github.com/acme/gadget/releases/tag/gadget-1.9.0",
    );

    assert_eq!(block.version, "v2.4.0");
    assert_eq!(
        block.timestamp,
        Utc.with_ymd_and_hms(2024, 1, 5, 14, 50, 0).unwrap()
    );
    assert_eq!(block.content, vec!["Faster checkout", "Fix login redirect"]);
    assert_eq!(block.releases.len(), 2);

    let (refs, rejected) = block.release_refs();
    assert!(rejected.is_empty());
    assert_eq!(refs[0].owner, "acme");
    assert_eq!(refs[0].repo, "widget");
    assert_eq!(refs[0].tag, "v2.4.0");
    assert_eq!(refs[1].repo, "gadget");
    assert_eq!(refs[1].tag, "gadget-1.9.0");
}

#[test]
fn date_only_header_is_midnight_utc() {
    let block = parsed("1.0.0 (2024-03-01)\nVersion\ngithub.com/acme/widget/releases/tag/1.0.0");
    assert_eq!(block.version, "v1.0.0");
    assert_eq!(
        block.timestamp,
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    );
}

#[test]
fn uppercase_version_prefix_is_lowercased() {
    let upper = parsed("V1.2.3 (2024-01-05)\nVersion");
    let lower = parsed("v1.2.3 (2024-01-05)\nVersion");
    assert_eq!(upper.version, "v1.2.3");
    assert_eq!(upper.version, lower.version);
}

#[test]
fn prerelease_suffix_is_kept() {
    let block = parsed("v3.0.0-rc1 (09h05, 2024-06-30)\nVersion");
    assert_eq!(block.version, "v3.0.0-rc1");
    assert!(block.releases.is_empty());
}

#[test]
fn block_without_marker_is_skipped() {
    let step = parse_version_block(
        "v1.0.0 (2024-01-05)\nnotes\ngithub.com/acme/widget/releases/tag/v1.0.0",
    );
    assert!(matches!(step, Step::Skipped(_)), "got {step:?}");
}

#[test]
fn malformed_headers_are_skipped() {
    for text in [
        "Release notes\nVersion",
        "v1.0 (2024-01-05)\nVersion",
        "v1.0.0 2024-01-05\nVersion",
        "v1.0.0 (14:50, 2024-01-05)\nVersion",
        "v1.0.0 (2024-13-01)\nVersion",
        "",
    ] {
        let step = parse_version_block(text);
        assert!(matches!(step, Step::Skipped(_)), "{text:?} gave {step:?}");
    }
}

#[test]
fn non_reference_lines_are_rejected_individually() {
    let block = parsed(
        "v1.0.0 (2024-01-05)\nVersion\nsee changelog\ngithub.com/acme/widget/releases/tag/v1.0.0",
    );
    let (refs, rejected) = block.release_refs();
    assert_eq!(refs.len(), 1);
    assert_eq!(rejected, vec!["see changelog"]);
}

#[test]
fn release_ref_with_and_without_scheme() {
    let with = ReleaseRef::parse("https://github.com/acme/widget/releases/tag/v1.2.3").unwrap();
    let without = ReleaseRef::parse("github.com/acme/widget/releases/tag/v1.2.3").unwrap();
    assert_eq!(with, without);
    assert_eq!(with.host, "github.com");
    assert_eq!(with.to_string(), "github.com/acme/widget/releases/tag/v1.2.3");

    assert!(ReleaseRef::parse("github.com/acme/widget/tags").is_none());
}

#[test]
fn split_blocks_on_blank_lines() {
    let text = "v1.1.0 (2024-01-06)\nVersion\r\n\r\n\n\nv1.0.0 (2024-01-05)\nVersion\n\n   \n";
    let blocks = split_blocks(text);
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].starts_with("v1.1.0"));
    assert!(blocks[1].starts_with("v1.0.0"));
}

#[test]
fn canonical_block_round_trips() {
    let block = parsed(
        "v1.2.3 (14h50, 2024-01-05)\nsome notes\nVersion\ngithub.com/acme/widget/releases/tag/v1.2.3",
    );
    assert_eq!(block.version, "v1.2.3");
    assert_eq!(block.timestamp.to_rfc3339(), "2024-01-05T14:50:00+00:00");
    assert_eq!(block.content, vec!["some notes"]);
    assert_eq!(
        block.releases,
        vec!["github.com/acme/widget/releases/tag/v1.2.3"]
    );
}
