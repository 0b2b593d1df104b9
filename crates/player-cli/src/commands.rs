//! Text control prompt.
//!
//! Lines typed on stdin are resolved against a small option table the way the playlist menus
//! resolve their choices: exact key, else a unique key prefix, else a unique name substring.

use std::io::BufRead;
use std::thread;

use crossbeam_channel::{Receiver, unbounded};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Clear,
    Status,
    Quit,
}

/// Key, label, and command of every prompt option.
const OPTIONS: &[(&str, &str, Command)] = &[
    ("p", "pause", Command::Pause),
    ("r", "resume playback", Command::Resume),
    ("c", "clear buffered audio", Command::Clear),
    ("s", "status", Command::Status),
    ("q", "quit", Command::Quit),
];

/// Resolve user input to a command, or `None` if it is empty, unknown, or ambiguous.
pub fn match_best(input: &str) -> Option<Command> {
    let pattern = input.trim().to_lowercase();
    if pattern.is_empty() {
        return None;
    }

    let mut by_key = Vec::new();
    let mut by_name = Vec::new();
    for (key, name, command) in OPTIONS {
        if *key == pattern {
            return Some(*command);
        }
        if key.starts_with(&pattern) {
            by_key.push(*command);
        }
        if name.contains(&pattern) {
            by_name.push(*command);
        }
    }

    // A key match, even an ambiguous one, shadows name matches.
    match (by_key.as_slice(), by_name.as_slice()) {
        ([only], _) => Some(*only),
        ([], [only]) => Some(*only),
        _ => None,
    }
}

/// One `[key]: label` line per option.
pub fn help() -> String {
    OPTIONS
        .iter()
        .map(|(key, name, _)| format!("[{key}]: {name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read stdin lines on a background thread and forward resolved commands.
///
/// Unresolvable input prints the option list. The channel disconnects when stdin closes.
pub fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match match_best(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("unknown command: {}\n{}", line.trim(), help()),
            }
        }
    });
    rx
}
