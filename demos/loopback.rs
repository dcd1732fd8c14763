//! Loopback demo
//!
//! Runs an AP and a modem end in one process, each driven by its own worker
//! threads, and bounces messages over every channel.
//!
//! Run with: `cargo run --example loopback`

use std::thread;
use std::time::{Duration, Instant};

use modem_link::dispatch::channel;
use modem_link::{BootState, Group, Inbox, LinkConfig, Loopback, Workers};

const ROUNDS: u32 = 1000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_names(true)
        .init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  modem_link loopback demo                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");

    let pair = Loopback::new(LinkConfig::default())?;
    let ap_inbox = Inbox::new();
    let cp_inbox = Inbox::new();
    for group in Group::ALL {
        pair.ap.register_receive_handler(group, ap_inbox.handler());
        pair.cp.register_receive_handler(group, cp_inbox.handler());
    }

    let ap_workers = Workers::spawn(pair.ap.clone())?;
    let cp_workers = Workers::spawn(pair.cp.clone())?;

    pair.cp.start_boot()?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while pair.ap.boot_state() != BootState::Done || pair.cp.boot_state() != BootState::Done {
        if Instant::now() > deadline {
            return Err("boot handshake timed out".into());
        }
        thread::sleep(Duration::from_millis(1));
    }
    println!("✓ boot handshake complete");

    let start = Instant::now();
    for round in 0..ROUNDS {
        let request = round.to_le_bytes();
        pair.cp.send(Group::Common, channel::RPC, &request)?;
        let (_, got) = ap_inbox
            .recv_timeout(channel::RPC, Duration::from_secs(1))
            .ok_or("request lost")?;

        pair.ap.send(Group::Common, channel::RPC, &got)?;
        cp_inbox
            .recv_timeout(channel::RPC, Duration::from_secs(1))
            .ok_or("reply lost")?;
    }
    let elapsed = start.elapsed();
    println!(
        "✓ {} round trips in {:.2?} ({:.2} µs each)",
        ROUNDS,
        elapsed,
        elapsed.as_secs_f64() * 1e6 / ROUNDS as f64
    );

    pair.ap.send(Group::Audio, channel::AUDIO, b"mute")?;
    let (_, audio) = cp_inbox
        .recv_timeout(channel::AUDIO, Duration::from_secs(1))
        .ok_or("audio command lost")?;
    println!("✓ audio group: {:?}", String::from_utf8_lossy(&audio));

    thread::sleep(pair.ap.config().idle_timeout * 2);
    println!("  common paths after idle: {:?}", pair.ap.path_states(Group::Common));

    ap_workers.shutdown();
    cp_workers.shutdown();
    Ok(())
}
