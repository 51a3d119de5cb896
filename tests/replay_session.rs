//! Replay mode over real sockets, driven by keystrokes and operator commands

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tn3270_relay::command_channel::channel;
use tn3270_relay::emulator::S3270Process;
use tn3270_relay::lib3270::codes::{negotiation_preamble, AID_ENTER, AID_PF7, CLEAR_SCREEN_BUFFER};
use tn3270_relay::replay::ReplayOptions;
use tn3270_relay::screen_store::load_with_defaults;
use tn3270_relay::server::run_replay;

async fn expect(client: &mut TcpStream, expected: &[u8]) {
    let mut got = vec![0u8; expected.len()];
    client.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected, "unexpected bytes from replay server");
}

fn framed(body: &[u8]) -> Vec<u8> {
    let mut data = body.to_vec();
    data.extend_from_slice(&[0xFF, 0xEF]);
    data
}

struct Fixture {
    _tmp: TempDir,
    base: PathBuf,
    defaults: PathBuf,
    alpha: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("captures");
    let defaults = tmp.path().join("defaults");
    let alpha = base.join("alpha");
    let beta = base.join("Beta-Run");
    for dir in [&defaults, &alpha, &beta] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(defaults.join("login.bin"), b"default login").unwrap();
    fs::write(alpha.join("000.bin"), b"alpha zero\xff\xef").unwrap();
    fs::write(alpha.join("001.bin"), b"alpha one").unwrap();
    fs::write(beta.join("000.bin"), b"beta zero").unwrap();
    fs::write(beta.join("LOGIN.bin"), b"beta login").unwrap();
    Fixture {
        _tmp: tmp,
        base,
        defaults,
        alpha,
    }
}

#[tokio::test]
async fn test_replay_with_defaults_commands_and_keys() {
    let fx = fixture();
    let screens = load_with_defaults(Some(&fx.defaults), &fx.alpha);
    assert_eq!(screens.names().collect::<Vec<_>>(), vec!["login", "000", "001"]);

    let options = ReplayOptions {
        defaults_dir: Some(fx.defaults.clone()),
        base_dir: Some(fx.base.clone()),
        ..ReplayOptions::default()
    };
    let (sender, commands) = channel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_replay::<S3270Process>(
        listener,
        screens,
        fx.alpha.clone(),
        options,
        commands,
        None,
    ));

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    expect(&mut client, &negotiation_preamble()).await;
    expect(&mut client, &framed(b"default login")).await;

    client.write_all(&[AID_ENTER, 0x5B, 0x6B, 0xFF]).await.unwrap();
    expect(&mut client, &framed(b"alpha zero")).await;

    sender.send("set 001");
    expect(&mut client, &framed(b"alpha one")).await;

    client.write_all(&[AID_PF7, 0x5B, 0x6B, 0xFF]).await.unwrap();
    expect(&mut client, &framed(b"alpha zero")).await;

    sender.send("change directory beta");
    expect(&mut client, &framed(b"beta login")).await;

    sender.send("next");
    expect(&mut client, &framed(b"beta zero")).await;

    sender.send("clear");
    expect(&mut client, &CLEAR_SCREEN_BUFFER).await;

    sender.send("prev");
    expect(&mut client, &framed(b"beta login")).await;

    sender.send("quit");
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_add_command_accepts_field_tokens() {
    let fx = fixture();
    let screens = load_with_defaults(None, &fx.alpha);
    let (sender, commands) = channel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_replay::<S3270Process>(
        listener,
        screens,
        fx.alpha.clone(),
        ReplayOptions::default(),
        commands,
        None,
    ));

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    expect(&mut client, &negotiation_preamble()).await;
    expect(&mut client, &framed(b"alpha zero")).await;

    sender.send("add banner 11 C1 C1 SF(c0=60) C8");
    expect(&mut client, &framed(b"alpha zero")).await;

    sender.send("add broken 11 ZZ");
    expect(&mut client, &framed(b"alpha zero")).await;

    sender.send("set BANNER");
    expect(&mut client, &[0xF5, 0xC3, 0x11, 0xC1, 0xC1, 0x1D, 0x60, 0xC8, 0xFF, 0xEF]).await;

    sender.send("set nothing-like-this");
    expect(&mut client, &[0xF5, 0xC3, 0x11, 0xC1, 0xC1, 0x1D, 0x60, 0xC8, 0xFF, 0xEF]).await;
}
