use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a line typed on stdin asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlInput {
    Exit,
    TogglePipelining,
}

impl ControlInput {
    /// `q`, `quit`, `esc` or a raw Esc character exit; `t`, `tab` or a raw Tab toggle.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "\x1b" {
            return Some(Self::Exit);
        }
        if line == "\t" {
            return Some(Self::TogglePipelining);
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" | "esc" => Some(Self::Exit),
            "t" | "tab" => Some(Self::TogglePipelining),
            _ => None,
        }
    }
}

/// Exit and mode-toggle requests raised from other threads and polled by the
/// orchestrator between streams.
#[derive(Clone, Debug, Default)]
pub struct Controls {
    exit: Arc<AtomicBool>,
    toggle: Arc<AtomicBool>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Ask for a pipelining toggle. Two requests before a poll cancel out.
    pub fn request_toggle(&self) {
        self.toggle.fetch_xor(true, Ordering::SeqCst);
    }

    /// Consume a pending toggle request.
    pub fn take_toggle(&self) -> bool {
        self.toggle.swap(false, Ordering::SeqCst)
    }

    pub fn apply(&self, input: ControlInput) {
        match input {
            ControlInput::Exit => self.request_exit(),
            ControlInput::TogglePipelining => self.request_toggle(),
        }
    }

    /// Route Ctrl-C to an exit request.
    pub fn install_signal_handler(&self) -> Result<()> {
        let exit = Arc::clone(&self.exit);
        ctrlc::set_handler(move || {
            exit.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")
    }

    /// Read control lines from stdin on a detached thread.
    pub fn spawn_stdin_listener(&self) -> Result<()> {
        let controls = self.clone();
        std::thread::Builder::new()
            .name("controls".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if let Some(input) = ControlInput::parse(&line) {
                        log::debug!("control input: {:?}", input);
                        controls.apply(input);
                    }
                }
            })
            .context("failed to spawn control listener")?;
        Ok(())
    }
}
