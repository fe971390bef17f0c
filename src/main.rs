//! Diagnostic console for Grbl controllers.
//!
//! A small line-oriented shell over the engine: connect to a port, type
//! G-code or `$` commands, watch the decoded event stream. Intended for
//! bring-up and wiring checks, not production streaming.

use std::io::Write as _;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use grblink::{
    init_logging, list_ports, ConnectionParams, EngineConfig, EngineEvent, GrblEngine,
    LifecycleState, VERSION,
};

const HELP: &str = "\
commands:
  ports                list likely CNC serial ports
  connect <port> [baud]  open a port and wait for the startup banner
  disconnect           close the connection
  send <line>          queue one command line (also: any line not listed here)
  hold                 feed hold (!)
  resume               cycle resume (~)
  reset                soft reset (Ctrl-X)
  unlock               $X
  home                 $H
  parser               $G parser-state query
  status               request a status report (?)
  state                print the current machine snapshot
  help                 this text
  quit                 exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    println!("grblink {} diagnostic console ('help' for commands)", VERSION);

    let mut engine = GrblEngine::new(EngineConfig::default());

    // Print every engine event as it arrives; lagged means the console
    // fell behind the stream, which is fine to note and move past.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("[{} events dropped]", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("flushing prompt")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),
            "ports" => match list_ports() {
                Ok(ports) if ports.is_empty() => println!("no CNC-looking ports found"),
                Ok(ports) => {
                    for port in ports {
                        println!("  {}  {}", port.port_name, port.description);
                    }
                }
                Err(e) => println!("port listing failed: {}", e),
            },
            "connect" => {
                let mut args = rest.split_whitespace();
                let Some(port) = args.next() else {
                    println!("usage: connect <port> [baud]");
                    continue;
                };
                let baud_rate = match args.next().map(str::parse) {
                    Some(Ok(baud)) => baud,
                    Some(Err(_)) => {
                        println!("baud must be a number");
                        continue;
                    }
                    None => 115_200,
                };
                let params = ConnectionParams {
                    port: port.to_string(),
                    baud_rate,
                    ..Default::default()
                };
                match engine.connect(&params).await {
                    Ok(info) => println!(
                        "connected: Grbl {} on {} at {} baud",
                        info.firmware_version, info.port, info.baud_rate
                    ),
                    Err(e) => println!("connect failed: {}", e),
                }
            }
            "disconnect" => {
                engine.disconnect().await;
                println!("disconnected");
            }
            "hold" => report(engine.feed_hold()),
            "resume" => report(engine.cycle_resume()),
            "reset" => report(engine.soft_reset()),
            "status" => report(engine.request_status()),
            "unlock" => report(engine.unlock().map(|_| ())),
            "home" => report(engine.home().map(|_| ())),
            "parser" => report(engine.query_parser_state().map(|_| ())),
            "state" => print_state(&engine),
            "send" => report(engine.submit(rest).map(|handle| {
                println!("queued #{}", handle.seq);
            })),
            // Anything else goes to the controller as-is.
            _ => report(engine.submit(line).map(|handle| {
                println!("queued #{}", handle.seq);
            })),
        }
    }

    engine.disconnect().await;
    Ok(())
}

fn report<T>(result: Result<T, grblink::EngineError>) {
    if let Err(e) = result {
        println!("{}", e);
    }
}

fn print_state(engine: &GrblEngine) {
    let state = engine.machine_state();
    println!("lifecycle: {}", engine.lifecycle_state());
    if engine.lifecycle_state() != LifecycleState::Ready {
        return;
    }
    println!("state:     {}", state.run_state);
    println!("mpos:      {}", state.machine_position);
    println!("wpos:      {}", state.work_position);
    println!("feed/spindle: {:.0} / {:.0}", state.feed_rate, state.spindle_speed);
    if !state.pins.is_empty() {
        println!("pins:      {}", state.pins);
    }
    if let Some(wcs) = &state.active_wcs {
        println!("wcs:       {}", wcs);
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StatusUpdated(state) => {
            println!(
                "[status] {} mpos={} wpos={}",
                state.run_state, state.machine_position, state.work_position
            );
        }
        EngineEvent::ParserStateUpdated(state) => {
            let words: Vec<&str> = state.modals.iter().map(|m| m.word.as_str()).collect();
            println!("[parser] {}", words.join(" "));
            for modal in &state.modals {
                println!("         {} - {}", modal.word, modal.description);
            }
        }
        EngineEvent::CommandAcknowledged { seq } => println!("[ok] #{}", seq),
        EngineEvent::CommandFailed {
            seq,
            code,
            description,
        } => println!("[error] #{} error:{} {}", seq, code, description),
        EngineEvent::AlarmRaised { code, .. } => {
            println!("[alarm] {}", grblink::codes::format_alarm(*code));
        }
        EngineEvent::ConnectionLost { reason } => println!("[lost] {}", reason),
        EngineEvent::InitializationComplete { firmware_version } => {
            println!("[ready] Grbl {}", firmware_version);
        }
        EngineEvent::InitializationFailed => println!("[init failed] no startup banner"),
        EngineEvent::Message(text) => println!("[msg] {}", text),
        EngineEvent::UnrecognizedLine(text) => println!("[?] {}", text),
    }
}
