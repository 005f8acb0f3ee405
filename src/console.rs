//! Line-oriented terminal front end

use crate::runtime::{HostHandle, HostUpdate, Message, Role};
use crate::typewriter::Reveal;
use crate::voice::VoiceStart;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

const HELP: &str = "输入问题并回车提问。命令：/voice 开始语音输入，/stop 停止语音，\
/send 发送语音内容，/history 查看对话记录，/quit 退出";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Question(String),
    Voice,
    Stop,
    Send,
    History,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Input {
    match line.trim() {
        "/voice" => Input::Voice,
        "/stop" => Input::Stop,
        "/send" => Input::Send,
        "/history" => Input::History,
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        _ => Input::Question(line.to_string()),
    }
}

/// Tracks what has been printed for the current answer so restarted reveals
/// never print the same text twice
#[derive(Debug, Default)]
pub struct RevealPrinter {
    printed: String,
}

impl RevealPrinter {
    /// New text to print for a reveal update, if it extends what is shown
    pub fn on_reveal(&mut self, revealed: &str) -> Option<String> {
        let rest = revealed.strip_prefix(self.printed.as_str())?;
        if rest.is_empty() {
            return None;
        }
        let rest = rest.to_string();
        self.printed.push_str(&rest);
        Some(rest)
    }

    /// Text to print for the committed assistant message
    pub fn on_final(&mut self, text: &str) -> String {
        let printed = std::mem::take(&mut self.printed);
        if printed.is_empty() {
            return text.to_string();
        }
        match text.strip_prefix(printed.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{text}"),
        }
    }

    pub fn reset(&mut self) {
        self.printed.clear();
    }
}

/// Transcript listing, one line per message in local time
pub fn format_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "（暂无对话记录）".to_string();
    }
    messages
        .iter()
        .map(|message| {
            let speaker = match message.role {
                Role::User => "你",
                Role::Assistant => "助手",
            };
            let at = message.created_at.with_timezone(&chrono::Local);
            format!("[{}] {speaker}：{}", at.format("%H:%M:%S"), message.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{text}");
    let _ = stdout.flush();
}

/// Print host updates and typewriter progress until the host stops
pub async fn render(
    mut updates: broadcast::Receiver<HostUpdate>,
    mut reveal: watch::Receiver<Reveal>,
    mut voice_input: watch::Receiver<String>,
) {
    let mut printer = RevealPrinter::default();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(HostUpdate::Message(message)) => match message.role {
                    Role::User => printer.reset(),
                    Role::Assistant => {
                        let rest = printer.on_final(&message.text);
                        print_flush(&format!("{rest}\n\n"));
                    }
                },
                Ok(HostUpdate::Progress { message, .. }) => {
                    if !message.is_empty() {
                        print_flush(&format!("…{message}\n"));
                    }
                }
                Ok(HostUpdate::Notice { text }) => print_flush(&format!("[提示] {text}\n")),
                Ok(HostUpdate::StateChange { .. } | HostUpdate::StaleDiscarded { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Renderer lagged behind host updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = reveal.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = reveal.borrow_and_update().text.clone();
                if let Some(delta) = printer.on_reveal(&text) {
                    print_flush(&delta);
                }
            },
            changed = voice_input.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = voice_input.borrow_and_update().clone();
                if !text.is_empty() {
                    print_flush(&format!("[语音] {text}\n"));
                }
            },
        }
    }
}

/// Read stdin until `/quit` or end of input
pub async fn run_repl(handle: &HostHandle) -> Result<(), Box<dyn std::error::Error>> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::History => println!("{}", format_history(&handle.messages())),
            Input::Voice => match handle.start_voice().await? {
                VoiceStart::Started => println!("[提示] 正在聆听…"),
                VoiceStart::AlreadyActive => println!("[提示] 语音输入已在进行中"),
                VoiceStart::Unsupported | VoiceStart::Failed => {}
            },
            Input::Stop => {
                if !handle.stop_voice().await? {
                    println!("[提示] 当前没有进行中的语音输入");
                }
            }
            Input::Send => handle.submit_voice_input()?,
            Input::Question(text) => handle.submit(text)?,
        }
    }
    Ok(())
}
