//! End-to-end rewrite semantics for the API proxy's body transformation.

use hdhr_proxy::proxy::ResponseRewriter;
use hdhr_proxy::services::DeviceInfo;

#[test]
fn full_discovery_response_rewrite() {
    let rewriter = ResponseRewriter::new("192.168.1.100", "ABCDEF12");
    let body = concat!(
        r#"{"FriendlyName":"HDHomeRun FLEX 4K","DeviceID":"ABCDEF12","#,
        r#""BaseURL":"http://192.168.1.100:80","#,
        r#""LineupURL":"http://192.168.1.100/lineup.json"}"#,
    );

    let rewritten = rewriter.rewrite(body, "proxy.local");

    assert!(rewritten.contains(r#""DeviceID":"21FEDCBA""#));
    assert!(rewritten.contains(r#""LineupURL":"http://proxy.local/lineup.json""#));
    // :80 is a non-5004 port on the tuner, so the address survives there.
    assert!(rewritten.contains(r#""BaseURL":"http://192.168.1.100:80""#));
}

#[test]
fn lineup_url_and_codec_rewrite() {
    let rewriter = ResponseRewriter::new("192.168.1.100", "ABCDEF12");
    let body = "dev ABCDEF12 at 192.168.1.100:5004 codec AC4";

    assert_eq!(
        rewriter.rewrite(body, "proxy.local"),
        "dev 21FEDCBA at proxy.local:5004 codec AC3"
    );
}

#[test]
fn device_id_reversal_is_an_involution() {
    let device = DeviceInfo::with_device_id("192.168.1.100", "10A4BCde");
    let reversed = device.reversed_id();
    let back: String = reversed.chars().rev().collect();
    assert_eq!(back, "10A4BCde");
}

#[test]
fn media_port_rewrite_is_idempotent_on_rewritten_output() {
    let rewriter = ResponseRewriter::new("192.168.1.100", "ABCDEF12");
    let body = r#"{"URL":"http://192.168.1.100:5004/auto/v5.1","AudioCodec":"AC4"}"#;

    let once = rewriter.rewrite(body, "gateway.lan:8080");
    let twice = rewriter.rewrite(&once, "gateway.lan:8080");
    assert_eq!(once, twice);
}

#[test]
fn client_port_80_is_elided() {
    let rewriter = ResponseRewriter::new("192.168.1.100", "ABCDEF12");
    let once = rewriter.rewrite("see http://192.168.1.100/info", "gateway.lan:80");
    assert_eq!(once, "see http://gateway.lan/info");
}

#[test]
fn multiline_lineup_rewrites_per_line() {
    // The streaming path hands the same transform one line at a time; a
    // body already split at newlines must come out identical either way.
    let rewriter = ResponseRewriter::new("192.168.1.100", "ABCDEF12");
    let body = "ABCDEF12\n192.168.1.100:5004\nAC4\n";

    let whole = rewriter.rewrite(body, "proxy.local");
    let per_line: String = body
        .split_inclusive('\n')
        .map(|line| rewriter.rewrite(line, "proxy.local"))
        .collect();

    assert_eq!(whole, per_line);
    assert_eq!(whole, "21FEDCBA\nproxy.local:5004\nAC3\n");
}
