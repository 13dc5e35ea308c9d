//! Terminal control surface for `parley talk`
//!
//! Enter toggles the conversation, `q` quits. Status changes are printed as
//! they are published.

use std::io::BufRead;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::conversation::{ConversationHandle, ConversationState, Status};

/// A line typed at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Start or interrupt
    Toggle,
    /// Stop the conversation loop
    Quit,
}

/// Parse one line of terminal input
#[must_use]
pub fn parse_input(line: &str) -> Option<Input> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Some(Input::Toggle),
        "q" | "quit" | "exit" => Some(Input::Quit),
        _ => None,
    }
}

/// Forward terminal input to the conversation until quit or EOF
///
/// Reads on a plain thread so a pending read never holds up runtime shutdown.
pub fn spawn_input(handle: ConversationHandle) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read terminal input");
                    break;
                }
            };

            match parse_input(&line) {
                Some(Input::Toggle) => {
                    if !handle.toggle() {
                        return;
                    }
                }
                Some(Input::Quit) => break,
                None => println!("(press Enter to start or interrupt, q to quit)"),
            }
        }

        handle.shutdown();
    })
}

/// Render a status as one terminal line
#[must_use]
pub fn render(status: &Status) -> String {
    let marker = match status.state {
        ConversationState::Idle if status.fault.is_some() => "!",
        ConversationState::Idle => " ",
        ConversationState::Listening => "o",
        ConversationState::Thinking => "~",
        ConversationState::Speaking => ">",
    };

    if status.detail.is_empty() {
        format!("[{marker}] {}", status.headline)
    } else {
        format!("[{marker}] {} - {}", status.headline, status.detail)
    }
}

/// Print status changes until the conversation goes away
///
/// Level-only updates (ring size) are not printed.
pub fn spawn_printer(mut rx: watch::Receiver<Status>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = render(&rx.borrow_and_update());
        println!("{last}");

        while rx.changed().await.is_ok() {
            let line = render(&rx.borrow_and_update());
            if line != last {
                println!("{line}");
                last = line;
            }
        }
    })
}
