use std::io::BufRead;
use std::thread::{self, JoinHandle};

use chiptick_core::Machine;
use crossbeam_channel::Sender;
use log::{info, warn};

const SPEED_STEP: f32 = 0.1;

/// Interactive commands read one per line from stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Zero-based channel index.
    ToggleMute(usize),
    /// Zero-based track index.
    SelectTrack(usize),
    NextTrack,
    PrevTrack,
    TogglePause,
    /// Volume in percent.
    Volume(u8),
    SpeedUp,
    SpeedDown,
    SpeedReset,
    Restart,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?;
    let arg = words.next();
    if words.next().is_some() {
        return None;
    }

    let command = match (cmd, arg) {
        ("1" | "2" | "3" | "4", None) => Command::ToggleMute(cmd.parse::<usize>().ok()? - 1),
        ("t", Some(n)) => Command::SelectTrack(n.parse().ok()?),
        ("n", None) => Command::NextTrack,
        ("b", None) => Command::PrevTrack,
        ("p", None) => Command::TogglePause,
        ("v", Some(n)) => Command::Volume(n.parse::<u8>().ok()?.min(100)),
        ("+", None) => Command::SpeedUp,
        ("-", None) => Command::SpeedDown,
        ("=", None) => Command::SpeedReset,
        ("r", None) => Command::Restart,
        ("q", None) => Command::Quit,
        _ => return None,
    };
    Some(command)
}

impl Command {
    /// Apply the command to `machine`. Returns `false` once playback should stop.
    pub fn apply(self, machine: &mut Machine) -> bool {
        match self {
            Command::ToggleMute(ch) => {
                let muted = machine.toggle_mute(ch);
                info!("Channel {} {}", ch + 1, if muted { "muted" } else { "unmuted" });
            }
            Command::SelectTrack(track) => {
                if let Err(e) = machine.select_track(track) {
                    warn!("{e}");
                }
            }
            Command::NextTrack => {
                machine.next_track();
            }
            Command::PrevTrack => {
                machine.prev_track();
            }
            Command::TogglePause => {
                machine.toggle_pause();
            }
            Command::Volume(percent) => machine.set_volume(percent as f32 / 100.0),
            Command::SpeedUp => {
                machine.adjust_speed(SPEED_STEP);
            }
            Command::SpeedDown => {
                machine.adjust_speed(-SPEED_STEP);
            }
            Command::SpeedReset => machine.set_speed(1.0),
            Command::Restart => machine.restart(),
            Command::Quit => return false,
        }
        true
    }
}

/// Read commands from stdin on a background thread until EOF or `q`.
pub fn spawn_stdin_reader(tx: Sender<Command>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() || cmd == Command::Quit {
                            break;
                        }
                    }
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chiptick_core::{GbsFile, MachineConfig};

    fn machine() -> Machine {
        // Three songs, init and play both a bare RET at 0x0400.
        let mut data = vec![0u8; 0x70];
        data[0..3].copy_from_slice(b"GBS");
        data[0x03] = 1;
        data[0x04] = 3;
        data[0x05] = 1;
        for off in [0x06, 0x08, 0x0A] {
            data[off..off + 2].copy_from_slice(&0x0400u16.to_le_bytes());
        }
        data[0x0C..0x0E].copy_from_slice(&0xDFFFu16.to_le_bytes());
        data.resize(0x70 + 0x4000, 0);
        data[0x70] = 0xC9;
        let file = GbsFile::load(&data).unwrap();
        Machine::new(file, MachineConfig::default()).unwrap()
    }

    #[test]
    fn parses_every_command() {
        assert_eq!(parse_command("1"), Some(Command::ToggleMute(0)));
        assert_eq!(parse_command(" 4 "), Some(Command::ToggleMute(3)));
        assert_eq!(parse_command("t 2"), Some(Command::SelectTrack(2)));
        assert_eq!(parse_command("n"), Some(Command::NextTrack));
        assert_eq!(parse_command("b"), Some(Command::PrevTrack));
        assert_eq!(parse_command("p"), Some(Command::TogglePause));
        assert_eq!(parse_command("v 55"), Some(Command::Volume(55)));
        assert_eq!(parse_command("v 200"), Some(Command::Volume(100)));
        assert_eq!(parse_command("+"), Some(Command::SpeedUp));
        assert_eq!(parse_command("-"), Some(Command::SpeedDown));
        assert_eq!(parse_command("="), Some(Command::SpeedReset));
        assert_eq!(parse_command("r"), Some(Command::Restart));
        assert_eq!(parse_command("q"), Some(Command::Quit));
    }

    #[test]
    fn rejects_malformed_input() {
        for line in ["", "5", "0", "t", "t x", "v", "v -3", "q now", "hello"] {
            assert_eq!(parse_command(line), None, "{line:?}");
        }
    }

    #[test]
    fn commands_drive_machine() {
        let mut m = machine();
        assert!(Command::ToggleMute(2).apply(&mut m));
        assert!(m.is_muted(2));

        Command::SelectTrack(2).apply(&mut m);
        assert_eq!(m.track(), 2);
        Command::SelectTrack(9).apply(&mut m);
        assert_eq!(m.track(), 2);
        Command::NextTrack.apply(&mut m);
        assert_eq!(m.track(), 0);
        Command::PrevTrack.apply(&mut m);
        assert_eq!(m.track(), 2);

        Command::Volume(25).apply(&mut m);
        assert!((m.volume() - 0.25).abs() < 1e-6);

        Command::SpeedUp.apply(&mut m);
        assert!((m.speed() - 1.1).abs() < 1e-4);
        Command::SpeedReset.apply(&mut m);
        assert_eq!(m.speed(), 1.0);

        Command::TogglePause.apply(&mut m);
        assert!(m.is_paused());
        assert!(!Command::Quit.apply(&mut m));
    }
}
