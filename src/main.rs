/*
 * This file is a part of dscached, a disk-store object cache core
 * derived in the spirit of Skytable (https://github.com/skytable/skytable).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! A line-oriented debug front end for the engine. The real wire
//! protocol and command dispatcher are out of scope for this core (they
//! live above it); this binary exists so the engine can be driven and
//! observed end to end without one. One connection is serviced at a
//! time — intentionally, this is a development harness, not the
//! production reactor.

use dscached::{
    config::Config,
    engine::{client::ClientId, Engine, GrabReply, LookupOutcome, ReleaseReply},
    keyval::{DbId, Key},
};
use std::{
    env,
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::PathBuf,
    time::{Duration, Instant},
};

const DEBUG_DB: DbId = 0;
const GET_TIMEOUT: Duration = Duration::from_secs(2);

fn main() {
    init_logging();

    let cfg = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    let bind_addr = cfg.bind_addr.clone();
    let cron_interval = Duration::from_millis(cfg.cron_interval_ms.max(1));

    log::info!("starting dscached, data_dir={}", cfg.data_dir);
    let mut engine = match Engine::new(cfg) {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to start engine: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&bind_addr) {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    listener
        .set_nonblocking(true)
        .expect("setting listener nonblocking");
    log::info!("listening on {bind_addr}");

    let io_rx = engine.io_notifications();
    let mut last_cron = Instant::now();
    loop {
        if last_cron.elapsed() >= cron_interval {
            engine.cron_tick();
            last_cron = Instant::now();
        }
        while io_rx.try_recv().is_ok() {
            engine.drain_completions();
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                log::debug!("accepted connection from {addr}");
                handle_connection(&mut engine, stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => log::warn!("accept failed: {e}"),
        }
    }
}

fn init_logging() {
    let env = env_logger::Env::default().filter_or("DSC_LOG", "info");
    env_logger::Builder::from_env(env).init();
}

fn load_config() -> dscached::util::error::DscResult<Config> {
    let path = env::args().nth(1).map(PathBuf::from);
    Config::load(path.as_deref())
}

fn handle_connection(engine: &mut Engine, stream: TcpStream) {
    let client = engine.register_client(DEBUG_DB);
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            log::warn!("could not clone connection: {e}");
            return;
        }
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let reply = dispatch_line(engine, client, &line);
        if writeln!(writer, "{reply}").is_err() {
            break;
        }
    }
    engine.disconnect_client(client);
}

fn dispatch_line(engine: &mut Engine, client: ClientId, line: &str) -> String {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, args)) = words.split_first() else {
        return "ERR empty command".to_string();
    };
    match cmd.to_ascii_uppercase().as_str() {
        "GET" => match args.first() {
            Some(key) => cmd_get(engine, client, Key::from(*key)),
            None => "ERR GET requires a key".to_string(),
        },
        "SET" => {
            if args.len() < 2 {
                return "ERR SET requires a key and a value".to_string();
            }
            engine.set(DEBUG_DB, Key::from(args[0]), args[1].as_bytes().to_vec(), None);
            "OK".to_string()
        }
        "DEL" => match args.first() {
            Some(key) => {
                engine.delete(DEBUG_DB, Key::from(*key));
                "OK".to_string()
            }
            None => "ERR DEL requires a key".to_string(),
        },
        "GRAB" => match args.first() {
            Some(key) => {
                let timeout_ms = args.get(1).and_then(|t| t.parse::<i64>().ok());
                match engine.grab(client, DEBUG_DB, Key::from(*key), timeout_ms) {
                    GrabReply::Ok => "OK".to_string(),
                    GrabReply::Blocked => "BLOCKED".to_string(),
                }
            }
            None => "ERR GRAB requires a key".to_string(),
        },
        "RELEASE" => match args.first() {
            Some(key) => match engine.release(client, DEBUG_DB, Key::from(*key)) {
                ReleaseReply::Ok => "OK".to_string(),
                ReleaseReply::NotOwner => "ERR not owner".to_string(),
            },
            None => "ERR RELEASE requires a key".to_string(),
        },
        other => format!("ERR unknown command {other}"),
    }
}

/// Mirrors what the (out-of-scope) command framework would do for any
/// declared-key command: preload via `wait_for`, then poll until the
/// engine's I/O pool reports the load complete or we time out.
fn cmd_get(engine: &mut Engine, client: ClientId, key: Key) -> String {
    match engine.lookup(DEBUG_DB, &key) {
        LookupOutcome::Value(v) => render_value(&v),
        LookupOutcome::Absent => "(nil)".to_string(),
        LookupOutcome::NeedsLoad => {
            engine.wait_for(client, DEBUG_DB, key.clone());
            let deadline = Instant::now() + GET_TIMEOUT;
            loop {
                if Instant::now() >= deadline {
                    return "ERR timed out waiting for load".to_string();
                }
                let notified = engine
                    .io_notifications()
                    .recv_timeout(Duration::from_millis(25))
                    .is_ok();
                if notified {
                    engine.drain_completions();
                }
                match engine.lookup(DEBUG_DB, &key) {
                    LookupOutcome::Value(v) => return render_value(&v),
                    LookupOutcome::Absent => return "(nil)".to_string(),
                    LookupOutcome::NeedsLoad => continue,
                }
            }
        }
    }
}

fn render_value(v: &std::sync::Arc<dscached::keyval::StoredValue>) -> String {
    String::from_utf8_lossy(v.payload()).into_owned()
}
