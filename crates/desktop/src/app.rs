//! Desktop AI: egui app state and UI.

use eframe::egui;
use lib::agent::{ChatAgent, ERROR_PREFIX};
use lib::bridge::{TaskBridge, TaskOutcome};
use lib::config::Settings;
use lib::models::ModelDirectory;
use lib::session::{Message, Role, SessionSummary, DEFAULT_LIST_LIMIT};
use log::Log;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

const CHAT_INPUT_HEIGHT: f32 = 90.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;
const BUBBLE_MAX_WIDTH_FRACTION: f32 = 0.75;

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();
static LOGGER: OnceLock<DesktopLogger> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for the Logs screen. When RUST_LOG is set,
/// records matching it are also written to stderr through env_logger.
struct DesktopLogger {
    stderr: Option<env_logger::Logger>,
}

impl Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::LevelFilter::Debug
            || self.stderr.as_ref().is_some_and(|l| l.enabled(metadata))
    }

    fn log(&self, record: &log::Record) {
        if record.level() <= log::LevelFilter::Debug {
            push_log_line(format!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            ));
        }
        if let Some(ref stderr) = self.stderr {
            if stderr.matches(record) {
                stderr.log(record);
            }
        }
    }

    fn flush(&self) {
        if let Some(ref stderr) = self.stderr {
            stderr.flush();
        }
    }
}

/// Install the desktop logger. Safe to call more than once.
pub fn install_logger() {
    let logger = LOGGER.get_or_init(|| DesktopLogger {
        stderr: std::env::var_os("RUST_LOG")
            .map(|_| env_logger::Builder::from_default_env().build()),
    });
    if log::set_logger(logger).is_ok() {
        let stderr_level = logger
            .stderr
            .as_ref()
            .map(|l| l.filter())
            .unwrap_or(log::LevelFilter::Off);
        log::set_max_level(stderr_level.max(log::LevelFilter::Debug));
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    History,
    Settings,
    Logs,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LineKind {
    User,
    Assistant,
    /// Local notice (help text, model switch); never persisted.
    Notice,
    /// Failed request; never persisted.
    Error,
}

#[derive(Clone)]
struct ChatLine {
    kind: LineKind,
    text: String,
}

impl ChatLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    fn from_stored(m: &Message) -> Option<Self> {
        let kind = match m.role {
            Role::User => LineKind::User,
            Role::Assistant => LineKind::Assistant,
            Role::System => return None,
        };
        Some(Self::new(kind, m.content.to_plain_text()))
    }
}

/// A sent prompt on its way to the bridge. A prompt queued during a frame has
/// already missed that frame's transcript, so it only becomes ready after the
/// following frame has drawn its bubble.
#[derive(Debug, Default)]
struct OutgoingTurn {
    prompt: Option<String>,
    drawn: bool,
}

impl OutgoingTurn {
    fn queue(&mut self, prompt: String) {
        self.prompt = Some(prompt);
        self.drawn = false;
    }

    fn is_queued(&self) -> bool {
        self.prompt.is_some()
    }

    /// Call before drawing: a prompt queued earlier is drawn by this frame.
    fn begin_frame(&mut self) {
        if self.prompt.is_some() {
            self.drawn = true;
        }
    }

    /// Call after drawing.
    fn take_ready(&mut self) -> Option<String> {
        if !self.drawn {
            return None;
        }
        self.drawn = false;
        self.prompt.take()
    }
}

const HELP_TEXT: &str = "available commands:\n\n/new - start a new conversation\n/help - show this help message\n\nEnter sends, Shift+Enter adds a new line.";

pub struct DesktopApp {
    settings: Settings,
    agent: ChatAgent,
    directory: ModelDirectory,
    /// Small runtime for model-directory queries made from the UI thread.
    runtime: tokio::runtime::Runtime,
    /// Runs chat turns off the UI thread; at most one in flight.
    bridge: TaskBridge<String>,
    /// Installed models, sorted.
    models: Vec<String>,
    /// Soft warning shown under the header after an empty refresh.
    model_warning: Option<String>,
    /// What the chat view shows: the bound session as stored, plus local notices.
    transcript: Vec<ChatLine>,
    /// Prompt whose bubble is shown but whose request has not been sent yet.
    outgoing: OutgoingTurn,
    /// Prompt of the in-flight turn.
    pending_prompt: Option<String>,
    chat_input: String,
    chat_error: Option<String>,
    /// True when the bound session was picked from history rather than started here.
    loaded_session: bool,
    current_screen: Screen,
    history: Vec<SessionSummary>,
    history_selected: Option<String>,
    history_messages: Vec<Message>,
    history_error: Option<String>,
    prompt_draft: String,
    settings_notice: Option<String>,
    /// Set by the signal watcher thread; the next frame closes the window.
    shutdown_requested: Arc<AtomicBool>,
}

impl DesktopApp {
    /// Space between the screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: Settings,
        agent: ChatAgent,
        directory: ModelDirectory,
        models: Vec<String>,
        runtime: tokio::runtime::Runtime,
    ) -> Self {
        let repaint_ctx = cc.egui_ctx.clone();
        let bridge = TaskBridge::with_notifier(move || repaint_ctx.request_repaint());

        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let flag = shutdown_requested.clone();
        let signal_ctx = cc.egui_ctx.clone();
        if let Err(e) = lib::lifecycle::spawn_shutdown_watcher(move || {
            flag.store(true, Ordering::SeqCst);
            signal_ctx.request_repaint();
        }) {
            log::warn!("could not watch for shutdown signals: {}", e);
        }

        let prompt_draft = agent.system_prompt().to_string();
        log::info!(
            "desktop started (model {}, session {})",
            agent.model(),
            agent.session_id()
        );
        Self {
            settings,
            agent,
            directory,
            runtime,
            bridge,
            models,
            model_warning: None,
            transcript: Vec::new(),
            outgoing: OutgoingTurn::default(),
            pending_prompt: None,
            chat_input: String::new(),
            chat_error: None,
            loaded_session: false,
            current_screen: Screen::default(),
            history: Vec::new(),
            history_selected: None,
            history_messages: Vec::new(),
            history_error: None,
            prompt_draft,
            settings_notice: None,
            shutdown_requested,
        }
    }

    fn busy(&self) -> bool {
        self.outgoing.is_queued() || self.bridge.is_active()
    }

    fn status_line(&self) -> String {
        if self.loaded_session {
            let short: String = self.agent.session_id().chars().take(8).collect();
            format!("Loaded conversation ({}...)", short)
        } else if self.transcript.iter().any(|l| l.kind == LineKind::User) {
            "Conversation in progress".to_string()
        } else {
            "New conversation".to_string()
        }
    }

    /// Rebuild the transcript from the store for the bound session.
    fn reload_transcript(&mut self) {
        self.transcript = self
            .agent
            .store()
            .get_messages(self.agent.session_id())
            .iter()
            .filter_map(ChatLine::from_stored)
            .collect();
    }

    fn start_new_conversation(&mut self) {
        if self.busy() {
            return;
        }
        self.agent.reset();
        self.loaded_session = false;
        self.transcript.clear();
        self.chat_error = None;
    }

    fn select_model(&mut self, model: String) {
        if self.busy() || model == self.agent.model() {
            return;
        }
        self.agent.update_model(model.clone());
        self.settings.set_model(model.clone());
        self.loaded_session = false;
        self.chat_error = None;
        self.transcript = vec![ChatLine::new(
            LineKind::Notice,
            format!("Switched to {}. Started a new conversation.", model),
        )];
    }

    fn refresh_models(&mut self) {
        let models = self.runtime.block_on(self.directory.get_models());
        if models.is_empty() {
            self.model_warning = Some(format!(
                "No models found on {}. Is Ollama running?",
                self.directory.host()
            ));
        } else {
            self.model_warning = None;
            self.models = models;
        }
    }

    /// Start a chat turn on the bridge if possible.
    /// Show the user bubble now; the request goes out once a frame has drawn it.
    fn start_chat_turn(&mut self, ctx: &egui::Context) {
        if self.busy() {
            return;
        }
        let message = self.chat_input.trim().to_string();
        if message.is_empty() {
            return;
        }
        self.chat_input.clear();
        self.chat_error = None;

        if message.eq_ignore_ascii_case("/new") {
            self.start_new_conversation();
            return;
        }
        if message.eq_ignore_ascii_case("/help") {
            self.transcript.push(ChatLine::new(LineKind::Notice, HELP_TEXT));
            return;
        }

        self.transcript.push(ChatLine::new(LineKind::User, message.clone()));
        self.outgoing.queue(message);
        ctx.request_repaint();
    }

    /// Send the queued prompt once its bubble has been on screen for a frame.
    fn dispatch_outgoing_turn(&mut self) {
        let Some(message) = self.outgoing.take_ready() else {
            return;
        };
        let agent = self.agent.clone();
        let prompt = message.clone();
        let started = self.bridge.start_task(move || async move {
            agent
                .try_get_response(&prompt)
                .await
                .map_err(anyhow::Error::from)
        });
        match started {
            Ok(_) => self.pending_prompt = Some(message),
            Err(e) => {
                if self
                    .transcript
                    .last()
                    .is_some_and(|l| l.kind == LineKind::User && l.text == message)
                {
                    self.transcript.pop();
                }
                self.chat_input = message;
                self.chat_error = Some(e.to_string());
            }
        }
    }

    /// Pick up the finished chat turn, if any. Call each frame.
    fn poll_chat_turn(&mut self) {
        let Some(event) = self.bridge.poll() else {
            return;
        };
        let prompt = self.pending_prompt.take();
        match event.outcome {
            TaskOutcome::Succeeded(reply) => {
                self.reload_transcript();
                let persisted = self
                    .transcript
                    .last()
                    .is_some_and(|l| l.kind == LineKind::Assistant && l.text == reply);
                if !persisted {
                    // The store write failed; show the turn anyway.
                    if let Some(p) = prompt {
                        self.transcript.push(ChatLine::new(LineKind::User, p));
                    }
                    self.transcript.push(ChatLine::new(LineKind::Assistant, reply));
                }
            }
            TaskOutcome::Failed(e) => {
                log::error!("chat turn {} failed: {}", event.id, e);
                self.transcript
                    .push(ChatLine::new(LineKind::Error, format!("{}{}", ERROR_PREFIX, e)));
            }
        }
    }

    fn refresh_history(&mut self) {
        self.history = self.agent.store().list_sessions(DEFAULT_LIST_LIMIT);
        let still_listed = self
            .history_selected
            .as_ref()
            .is_some_and(|id| self.history.iter().any(|s| &s.session_id == id));
        if !still_listed {
            self.history_selected = None;
            self.history_messages.clear();
        }
    }

    fn select_history(&mut self, session_id: String) {
        self.history_messages = self.agent.store().get_messages(&session_id);
        self.history_selected = Some(session_id);
        self.history_error = None;
    }

    fn load_selected_session(&mut self) {
        if self.busy() {
            return;
        }
        let Some(id) = self.history_selected.clone() else {
            return;
        };
        if !self.agent.store().session_exists(&id) {
            self.history_error = Some("That conversation no longer exists.".to_string());
            self.refresh_history();
            return;
        }
        self.agent.load_session(id);
        self.loaded_session = true;
        self.chat_error = None;
        self.reload_transcript();
        self.current_screen = Screen::Chat;
    }

    fn delete_selected_session(&mut self) {
        let Some(id) = self.history_selected.clone() else {
            return;
        };
        if self.busy() && id == self.agent.session_id() {
            self.history_error =
                Some("Wait for the current reply before deleting this conversation.".to_string());
            return;
        }
        if self.agent.store().delete_session(&id) {
            if id == self.agent.session_id() {
                self.start_new_conversation();
            }
            self.history_selected = None;
            self.history_messages.clear();
            self.history_error = None;
        } else {
            self.history_error = Some("Could not delete the conversation.".to_string());
        }
        self.refresh_history();
    }

    fn save_system_prompt(&mut self) {
        if self.busy() {
            return;
        }
        let prompt = self.prompt_draft.trim().to_string();
        self.settings.set_system_prompt(prompt.clone());
        self.agent.update_system_prompt(prompt);
        self.settings_notice = Some(format!("Saved to {}", self.settings.path().display()));
    }

    fn render_chat_line(ui: &mut egui::Ui, line: &ChatLine) {
        let visuals = ui.style().visuals.clone();
        let fill = match line.kind {
            LineKind::User => visuals.extreme_bg_color,
            LineKind::Assistant => visuals.panel_fill,
            LineKind::Notice => visuals.faint_bg_color,
            LineKind::Error => visuals.faint_bg_color,
        };
        let frame = egui::Frame::none()
            .fill(fill)
            .stroke(egui::Stroke::new(
                1.0,
                visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        let layout = if line.kind == LineKind::User {
            egui::Layout::right_to_left(egui::Align::Min)
        } else {
            egui::Layout::left_to_right(egui::Align::Min)
        };
        let max_width = ui.available_width() * BUBBLE_MAX_WIDTH_FRACTION;
        ui.with_layout(layout, |ui| {
            frame.show(ui, |ui| {
                ui.set_max_width(max_width);
                match line.kind {
                    LineKind::User => {
                        ui.label(egui::RichText::new(&line.text).strong());
                    }
                    LineKind::Assistant => {
                        ui.label(&line.text);
                    }
                    LineKind::Notice => {
                        ui.label(egui::RichText::new(&line.text).italics());
                    }
                    LineKind::Error => {
                        ui.colored_label(visuals.error_fg_color, &line.text);
                    }
                }
            });
        });
    }

    /// Messages area fills the space; input and controls are fixed at the bottom.
    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        let busy = self.busy();
        ui.label(egui::RichText::new(self.status_line()).weak());
        ui.add_space(8.0);

        let row_height = ui.spacing().interact_size.y + 8.0;
        let bottom_section_height =
            CHAT_INPUT_HEIGHT + 8.0 + row_height + Self::SCREEN_FOOTER_SPACING;
        let messages_height =
            (ui.available_height() - bottom_section_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        egui::ScrollArea::vertical()
            .max_height(messages_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                if self.transcript.is_empty() {
                    ui.label(egui::RichText::new("Say hello to start the conversation.").weak());
                }
                for line in &self.transcript {
                    Self::render_chat_line(ui, line);
                    ui.add_space(8.0);
                }
                if busy {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Thinking...");
                    });
                }
            });

        ui.add_space(8.0);

        let input_id = egui::Id::new("chat_input");
        let input_focused = ui.memory(|m| m.has_focus(input_id));
        // Enter sends; Shift+Enter falls through to the text edit as a newline.
        let enter_pressed = !busy
            && input_focused
            && ui.input_mut(|i| i.consume_key(egui::Modifiers::NONE, egui::Key::Enter));

        ui.add_enabled_ui(!busy, |ui| {
            ui.add_sized(
                [ui.available_width(), CHAT_INPUT_HEIGHT],
                egui::TextEdit::multiline(&mut self.chat_input)
                    .id(input_id)
                    .hint_text("Type a message, /help for commands"),
            );
        });
        ui.add_space(8.0);

        let mut send_now = enter_pressed;
        ui.horizontal(|ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.add_enabled(!busy, egui::Button::new("Send")).clicked() {
                    send_now = true;
                }
                if ui.add_enabled(!busy, egui::Button::new("/new")).clicked() {
                    self.start_new_conversation();
                }
            });
        });
        if send_now {
            self.start_chat_turn(ui.ctx());
        }

        if let Some(ref err) = self.chat_error {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::RED, err);
        }
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_history_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            ui.heading("History");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Refresh").clicked() {
                    self.refresh_history();
                }
            });
        });
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if let Some(ref err) = self.history_error {
            ui.colored_label(egui::Color32::RED, err);
            ui.add_space(8.0);
        }

        let now = chrono::Utc::now().naive_utc();
        let height = (ui.available_height() - Self::SCREEN_FOOTER_SPACING).max(0.0);
        let mut clicked: Option<String> = None;
        ui.columns(2, |cols| {
            egui::ScrollArea::vertical()
                .id_source("history_list")
                .max_height(height)
                .show(&mut cols[0], |ui| {
                    if self.history.is_empty() {
                        ui.label("No conversations yet.");
                    }
                    for s in &self.history {
                        let selected =
                            self.history_selected.as_deref() == Some(s.session_id.as_str());
                        let label = format!(
                            "{}\n{} · {} messages",
                            s.preview(),
                            s.relative_time(now),
                            s.message_count
                        );
                        if ui.selectable_label(selected, label).clicked() {
                            clicked = Some(s.session_id.clone());
                        }
                        ui.add_space(4.0);
                    }
                });

            let ui = &mut cols[1];
            if self.history_selected.is_some() {
                let busy = self.bridge.is_active();
                ui.horizontal(|ui| {
                    if ui.add_enabled(!busy, egui::Button::new("Load")).clicked() {
                        self.load_selected_session();
                    }
                    if ui.button("Delete").clicked() {
                        self.delete_selected_session();
                    }
                });
                ui.add_space(8.0);
                egui::ScrollArea::vertical()
                    .id_source("history_preview")
                    .max_height(height)
                    .show(ui, |ui| {
                        if self.history_messages.is_empty() {
                            ui.label("No readable messages in this conversation.");
                        }
                        for m in &self.history_messages {
                            if let Some(line) = ChatLine::from_stored(m) {
                                Self::render_chat_line(ui, &line);
                                ui.add_space(8.0);
                            }
                        }
                    });
            } else {
                ui.label("Select a conversation to preview it.");
            }
        });
        if let Some(id) = clicked {
            self.select_history(id);
        }
    }

    fn ui_settings_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Settings");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let busy = self.busy();
        ui.label("System prompt");
        ui.add_space(4.0);
        ui.add_sized(
            [ui.available_width(), 160.0],
            egui::TextEdit::multiline(&mut self.prompt_draft),
        );
        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui.add_enabled(!busy, egui::Button::new("Save")).clicked() {
                self.save_system_prompt();
            }
            if ui.button("Revert").clicked() {
                self.prompt_draft = self.agent.system_prompt().to_string();
                self.settings_notice = None;
            }
        });
        if let Some(ref notice) = self.settings_notice {
            ui.add_space(4.0);
            ui.label(egui::RichText::new(notice).weak());
        }

        ui.add_space(24.0);
        egui::Grid::new("settings_info")
            .num_columns(2)
            .spacing([16.0, 6.0])
            .show(ui, |ui| {
                ui.label("Model");
                ui.label(self.agent.model());
                ui.end_row();
                ui.label("Endpoint");
                ui.label(&self.agent.config().base_url);
                ui.end_row();
                ui.label("Model host");
                ui.label(self.directory.host());
                ui.end_row();
                ui.label("Config file");
                ui.label(self.settings.path().display().to_string());
                ui.end_row();
                ui.label("History database");
                ui.label(self.agent.store().path().display().to_string());
                ui.end_row();
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl eframe::App for DesktopApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
        self.poll_chat_turn();
        self.outgoing.begin_frame();
        let busy = self.busy();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    let mut chosen: Option<String> = None;
                    ui.horizontal(|ui| {
                        ui.heading("Desktop AI");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.add_enabled(!busy, egui::Button::new("Reset")).clicked() {
                                self.start_new_conversation();
                                self.current_screen = Screen::Chat;
                            }
                            if ui.add_enabled(!busy, egui::Button::new("Refresh")).clicked() {
                                self.refresh_models();
                            }
                            ui.add_enabled_ui(!busy, |ui| {
                                egui::ComboBox::from_id_source("model_select")
                                    .selected_text(self.agent.model())
                                    .show_ui(ui, |ui| {
                                        for m in &self.models {
                                            let selected = m == self.agent.model();
                                            if ui.selectable_label(selected, m).clicked() {
                                                chosen = Some(m.clone());
                                            }
                                        }
                                    });
                            });
                        });
                    });
                    if let Some(m) = chosen {
                        self.select_model(m);
                    }
                    if let Some(ref warning) = self.model_warning {
                        ui.add_space(4.0);
                        ui.colored_label(ui.visuals().warn_fg_color, warning);
                    }
                    ui.add_space(16.0);
                });
        });

        let mut switched_to_history = false;
        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        for (screen, label) in [
                            (Screen::Chat, "Chat"),
                            (Screen::History, "History"),
                            (Screen::Settings, "Settings"),
                            (Screen::Logs, "Logs"),
                        ] {
                            if ui.selectable_label(*current_screen == screen, label).clicked() {
                                if screen == Screen::History && *current_screen != screen {
                                    switched_to_history = true;
                                }
                                *current_screen = screen;
                            }
                            ui.add_space(12.0);
                        }
                    });
            });
        if switched_to_history {
            self.history_error = None;
            self.refresh_history();
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => {
                        ui.add_space(24.0);
                        ui.heading("Chat");
                        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                        self.ui_chat(ui);
                    }
                    Screen::History => self.ui_history_screen(ui),
                    Screen::Settings => self.ui_settings_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });
        self.dispatch_outgoing_turn();
    }
}

/// One-shot window that reports a fatal startup problem.
pub struct FatalDialog {
    message: String,
}

impl FatalDialog {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl eframe::App for FatalDialog {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::same(24.0))
                .show(ui, |ui| {
                    ui.heading("Desktop AI cannot start");
                    ui.add_space(12.0);
                    ui.label(&self.message);
                    ui.add_space(24.0);
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib::session::Content;

    #[test]
    fn outgoing_turn_waits_for_a_drawn_frame() {
        let mut turn = OutgoingTurn::default();
        turn.begin_frame();
        turn.queue("Hi".to_string());
        assert!(turn.is_queued());
        assert_eq!(turn.take_ready(), None);

        turn.begin_frame();
        assert_eq!(turn.take_ready().as_deref(), Some("Hi"));
        assert!(!turn.is_queued());

        turn.begin_frame();
        assert_eq!(turn.take_ready(), None);
    }

    fn stored(role: Role, text: &str) -> Message {
        Message {
            role,
            content: Content::from(text),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 3, 10)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .unwrap(),
        }
    }

    #[test]
    fn stored_messages_map_to_lines() {
        let user = ChatLine::from_stored(&stored(Role::User, "Hi")).unwrap();
        assert!(user.kind == LineKind::User);
        assert_eq!(user.text, "Hi");
        let reply = ChatLine::from_stored(&stored(Role::Assistant, "Hello!")).unwrap();
        assert!(reply.kind == LineKind::Assistant);
        assert!(ChatLine::from_stored(&stored(Role::System, "rules")).is_none());
    }

    #[test]
    fn log_buffer_is_bounded() {
        for i in 0..LOG_BUFFER_MAX_LINES + 10 {
            push_log_line(format!("line {}", i));
        }
        let buf = log_buffer().lock().unwrap();
        assert_eq!(buf.len(), LOG_BUFFER_MAX_LINES);
        assert_eq!(buf.back().map(String::as_str), Some("line 2009"));
    }
}
