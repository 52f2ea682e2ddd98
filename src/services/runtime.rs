//! Thread host for one stat.
//!
//! Everything that touches the engine runs on the thread calling [`run`].
//! Timers, gateway calls and console input happen on helper threads and come
//! back as [`Command`]s over one channel.

use crate::client::{BulkResponse, Gateway};
use crate::models::point::{ACTIVE, INACTIVE};
use crate::models::role::{PointRole, fan_speed_state};
use crate::models::stat::{Stat, friendly_stat_name};
use crate::models::status::SyncStatus;
use crate::services::events::SyncEvent;
use crate::services::scheduler::{ThreadScheduler, Timer};
use crate::services::snapshot;
use crate::services::sync::{Dispatcher, ReadOutcome, SyncEngine, SyncSettings, WriteOutcome};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { role: PointRole, value: String },
    FanManual(bool),
    Refresh,
    Show,
    ClearSnapshot,
    TimerFired { timer: Timer, generation: u64 },
    ReadCompleted(BulkResponse),
    WriteCompleted(BulkResponse),
    Shutdown,
}

/// Parse one console line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_lowercase().as_str() {
        "set" => {
            let key = words.next().ok_or("usage: set <ROLE> <value>")?;
            let role = PointRole::from_key(key).ok_or_else(|| format!("unknown point {}", key))?;
            let value = words.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err("usage: set <ROLE> <value>".to_string());
            }
            Command::Set { role, value }
        }
        "fan" => match words.next().map(str::to_lowercase).as_deref() {
            Some("auto") => Command::FanManual(false),
            Some("manual") => Command::FanManual(true),
            _ => return Err("usage: fan auto|manual".to_string()),
        },
        "refresh" => Command::Refresh,
        "show" => Command::Show,
        "clear" => Command::ClearSnapshot,
        "quit" | "exit" => Command::Shutdown,
        other => return Err(format!("unknown command {}", other)),
    };
    Ok(Some(command))
}

/// Runs gateway calls on worker threads and posts the responses back.
pub struct ThreadDispatcher {
    gateway: Arc<dyn Gateway>,
    tx: Sender<Command>,
}

impl ThreadDispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, tx: Sender<Command>) -> Self {
        ThreadDispatcher { gateway, tx }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn bulk_read(&mut self, references: BTreeSet<String>) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let response = gateway.bulk_read(&references);
            let _ = tx.send(Command::ReadCompleted(response));
        });
    }

    fn bulk_write(&mut self, values: BTreeMap<String, String>) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let response = gateway.bulk_write(&values);
            let _ = tx.send(Command::WriteCompleted(response));
        });
    }
}

type Engine = SyncEngine<ThreadScheduler, ThreadDispatcher>;

pub struct Host {
    engine: Engine,
    events: Receiver<SyncEvent>,
    snapshot_file: PathBuf,
}

impl Host {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        stat: Stat,
        settings: SyncSettings,
        snapshot_file: PathBuf,
        tx: Sender<Command>,
    ) -> Self {
        let timer_tx = tx.clone();
        let scheduler = ThreadScheduler::new(move |timer, generation| {
            let _ = timer_tx.send(Command::TimerFired { timer, generation });
        });
        let dispatcher = ThreadDispatcher::new(gateway, tx);
        let mut engine = SyncEngine::new(stat, settings, scheduler, dispatcher);
        let (_, events) = engine.subscribe();
        Host {
            engine,
            events,
            snapshot_file,
        }
    }

    /// Handle one command. Returns false once the host should stop.
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Set { role, value } => {
                if !self.engine.stat().point(role).is_set() {
                    warn!("{} is not set up on this stat", role.key());
                } else if !self.engine.stat().is_valid(role) {
                    warn!("{} points to an object of the wrong type", role.key());
                } else if self.engine.set_value(role, encode_console_value(role, &value)) {
                    info!("{} -> {}", role.key(), self.engine.stat().formatted(role));
                }
            }
            Command::FanManual(manual) => {
                if !self.engine.set_fan_manual(manual) {
                    info!("Fan mode unchanged");
                }
            }
            Command::Refresh => {
                self.engine.start_refresh(Duration::ZERO);
            }
            Command::Show => self.show(),
            Command::ClearSnapshot => {
                if let Err(e) = snapshot::clear(&self.snapshot_file) {
                    warn!("Clearing snapshot failed: {}", e);
                }
            }
            Command::TimerFired { timer, generation } => {
                if self.engine.scheduler_mut().accept(timer, generation) {
                    self.engine.on_timer(timer);
                } else {
                    debug!("{:?} timer fire {} superseded", timer, generation);
                }
            }
            Command::ReadCompleted(response) => {
                if self.engine.on_read_complete(response) == ReadOutcome::Halted {
                    error!("Polling stopped after repeated failures; type `refresh` to retry");
                    self.engine.halt_and_restore();
                }
            }
            Command::WriteCompleted(response) => {
                if self.engine.on_write_complete(response) == WriteOutcome::RolledBack {
                    error!("Changes could not be written and were rolled back");
                }
            }
            Command::Shutdown => {
                self.save_snapshot();
                self.engine.shutdown();
                return false;
            }
        }
        self.drain_events();
        true
    }

    pub fn start(&mut self) {
        self.save_snapshot();
        self.engine.start_refresh(Duration::ZERO);
    }

    fn save_snapshot(&self) {
        if let Err(e) = snapshot::save(&self.snapshot_file, self.engine.stat()) {
            warn!("Saving snapshot failed: {}", e);
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SyncEvent::StatusUpdated(SyncStatus::Ok) => debug!("status: OK"),
                SyncEvent::StatusUpdated(status) => warn!("status: {} ({})", status.describe(), status),
                SyncEvent::DataUpdated => debug!("data: {}", summary_line(self.engine.stat())),
            }
        }
    }

    fn show(&self) {
        let stat = self.engine.stat();
        info!("{}", friendly_stat_name(stat.name(), None));
        for (role, point) in stat.get_points(false) {
            let label = if point.display_name().is_empty() { role.key() } else { point.display_name() };
            let pending = if point.is_dirty() { " (pending)" } else { "" };
            info!("  {:<14} {:<28} {}{}", role.key(), label, stat.formatted(role), pending);
        }
        if !stat.lights_disabled() {
            info!("  lights: {}", stat.lights_summary());
        }
    }
}

/// Console shorthands: fan speeds by label, `on`/`off` for two-state points.
fn encode_console_value(role: PointRole, value: &str) -> &str {
    match (role, value.to_lowercase().as_str()) {
        (PointRole::Fan, _) => fan_speed_state(value).unwrap_or(value),
        (_, "on") => ACTIVE,
        (_, "off") => INACTIVE,
        _ => value,
    }
}

fn summary_line(stat: &Stat) -> String {
    stat.get_points(false)
        .into_iter()
        .filter(|(role, _)| *role != PointRole::FanOverride)
        .map(|(role, _)| format!("{}={}", role.key(), stat.formatted(role)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_console(tx: Sender<Command>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Ok(Some(command)) => {
                    let quit = command == Command::Shutdown;
                    if tx.send(command).is_err() || quit {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }
        let _ = tx.send(Command::Shutdown);
    });
}

/// Drive `stat` until the console asks to quit or closes.
pub fn run(gateway: Arc<dyn Gateway>, stat: Stat, settings: SyncSettings, snapshot_file: PathBuf) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    let mut host = Host::new(gateway, stat, settings, snapshot_file, tx.clone());
    spawn_console(tx);

    info!("Commands: set <ROLE> <value> | fan auto|manual | show | refresh | clear | quit");
    host.start();
    host.show();

    for command in rx {
        if !host.handle(command) {
            break;
        }
    }
    info!("Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stat::tests::loaded_stat;
    use crate::services::demo::{DEMO_STAT_NAME, DemoGateway};

    #[test]
    fn parses_console_commands() {
        assert_eq!(
            parse_command("set temp_sp 23.5").expect("ok"),
            Some(Command::Set {
                role: PointRole::TempSetpoint,
                value: "23.5".to_string()
            })
        );
        assert_eq!(parse_command("fan MANUAL").expect("ok"), Some(Command::FanManual(true)));
        assert_eq!(parse_command("  ").expect("ok"), None);
        assert_eq!(parse_command("quit").expect("ok"), Some(Command::Shutdown));
        assert!(parse_command("set NOPE 1").is_err());
        assert!(parse_command("set TEMP_SP").is_err());
        assert!(parse_command("fan sideways").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn console_shorthands() {
        assert_eq!(encode_console_value(PointRole::Fan, "II"), "4");
        assert_eq!(encode_console_value(PointRole::Fan, "1"), "1");
        assert_eq!(encode_console_value(PointRole::Lights1, "ON"), "active");
        assert_eq!(encode_console_value(PointRole::Occupancy, "off"), "inactive");
        assert_eq!(encode_console_value(PointRole::TempSetpoint, "21.5"), "21.5");
    }

    #[test]
    fn host_round_trip_against_demo_gateway() {
        let gateway: Arc<dyn Gateway> = Arc::new(DemoGateway::new());
        let doc = gateway.get_stat(DEMO_STAT_NAME).expect("demo stat");
        let mut stat = Stat::new();
        stat.load_from_representation(&doc);

        let snapshot_file = std::env::temp_dir().join(format!("virtual-stat-host-{}.json", std::process::id()));
        let settings = SyncSettings {
            write_debounce: Duration::from_millis(5),
            ..SyncSettings::default()
        };
        let (tx, rx) = mpsc::channel();
        let mut host = Host::new(gateway, stat, settings, snapshot_file.clone(), tx);
        host.start();

        // first poll: timer fire, then the read completion
        let mut reads = 0;
        while reads == 0 {
            let command = rx.recv_timeout(Duration::from_secs(5)).expect("command");
            if matches!(command, Command::ReadCompleted(_)) {
                reads += 1;
            }
            assert!(host.handle(command));
        }
        assert_eq!(host.engine.stat().point(PointRole::TempSetpoint).value(), "22");

        host.handle(Command::Set {
            role: PointRole::TempSetpoint,
            value: "24".to_string(),
        });
        loop {
            let command = rx.recv_timeout(Duration::from_secs(5)).expect("command");
            let done = matches!(command, Command::WriteCompleted(_));
            host.handle(command);
            if done {
                break;
            }
        }
        assert_eq!(host.engine.stat().point(PointRole::TempSetpoint).value(), "24");
        assert!(!host.engine.stat().point(PointRole::TempSetpoint).is_dirty());

        assert!(!host.handle(Command::Shutdown));
        assert!(snapshot::load(&snapshot_file).expect("load").is_some());
        let _ = snapshot::clear(&snapshot_file);
    }

    #[test]
    fn set_on_unconfigured_slot_is_refused() {
        let (tx, _rx) = mpsc::channel();
        let gateway: Arc<dyn Gateway> = Arc::new(DemoGateway::new());
        let path = std::env::temp_dir().join("virtual-stat-unused.json");
        let mut host = Host::new(gateway, loaded_stat(), SyncSettings::default(), path, tx);
        host.handle(Command::Set {
            role: PointRole::OutdoorTemp,
            value: "5".to_string(),
        });
        assert!(host.engine.stat().get_points(true).is_empty());
    }
}
