use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Bar, BarChart, BarGroup, Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::chart::{ChartBar, TITLE};
use crate::error::TrackerError;

const EVENTS_MAX: usize = 12;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Index,
    Query,
    Reconcile,
    Annotate,
    Publish,
    Chart,
    Done,
}

impl Phase {
    fn parse(message: &str) -> Option<(Phase, &str)> {
        let rest = message.strip_prefix("phase=")?;
        let (name, payload) = rest.split_once(';').unwrap_or((rest, ""));
        let phase = match name {
            "Index" => Phase::Index,
            "Query" => Phase::Query,
            "Reconcile" => Phase::Reconcile,
            "Annotate" => Phase::Annotate,
            "Publish" => Phase::Publish,
            "Chart" => Phase::Chart,
            "Done" => Phase::Done,
            _ => return None,
        };
        Some((phase, payload.trim()))
    }

    fn label(self) -> &'static str {
        match self {
            Phase::Index => "sample index",
            Phase::Query => "query",
            Phase::Reconcile => "reconcile",
            Phase::Annotate => "annotate",
            Phase::Publish => "publish",
            Phase::Chart => "chart",
            Phase::Done => "done",
        }
    }
}

struct State {
    phase: Phase,
    status: String,
    requests: usize,
    last_latency_ms: Option<u128>,
    events: VecDeque<String>,
    started: Instant,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<State>>,
}

struct TuiProgress {
    state: Arc<Mutex<State>>,
    cancel: Arc<AtomicBool>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let message = event.message.trim().to_string();
        if let Some((phase, payload)) = Phase::parse(&message) {
            state.phase = phase;
            state.status = payload.to_string();
        } else if let Some(latency) = parse_latency(&message) {
            state.requests += 1;
            state.last_latency_ms = Some(latency);
        }
        state.events.push_back(message);
        while state.events.len() > EVENTS_MAX {
            state.events.pop_front();
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(State {
                phase: Phase::Index,
                status: "starting".to_string(),
                requests: 0,
                last_latency_ms: None,
                events: VecDeque::new(),
                started: Instant::now(),
            })),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or `Esc` asks the worker
    /// to stop before its next remote write; the view stays up until the worker returns.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, TrackerError> + Send + 'static,
        R: Send + 'static,
    {
        let mut terminal = enter()?;
        let (tx, rx) = std::sync::mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let sink = TuiProgress {
            state: self.state.clone(),
            cancel: cancel.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_progress(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }
            if let Ok(result) = rx.try_recv() {
                handle.join().ok();
                break result;
            }
            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if is_quit(key) && !cancel.swap(true, Ordering::SeqCst) {
                        if let Ok(mut state) = self.state.lock() {
                            state.status = "stopping after the current step".to_string();
                        }
                    }
                }
            }
            tick = tick.wrapping_add(1);
        };
        leave()?;
        result.map_err(miette::Report::new)
    }

    /// Shows the progress chart until a quit key is pressed.
    pub fn show_chart(&mut self, bars: &[ChartBar]) -> miette::Result<()> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut terminal = enter()?;
        loop {
            terminal
                .draw(|frame| draw_chart(frame, bars))
                .into_diagnostic()?;
            if event::poll(Duration::from_millis(250)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if is_quit(key) {
                        break;
                    }
                }
            }
        }
        leave()
    }
}

fn enter() -> miette::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn is_quit(key: KeyEvent) -> bool {
    key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

fn draw_progress(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &State, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(6)])
        .split(frame.area());

    let spinner = if state.phase == Phase::Done {
        " "
    } else {
        SPINNER[tick % SPINNER.len()]
    };
    let latency = state
        .last_latency_ms
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "-".to_string());
    let header = Line::from(vec![
        Span::styled(
            format!("pcawg-tracker {} ", kind.title()),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{spinner} {} ", state.phase.label()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(format!(
            "| {} | requests {} | last {latency} | {}s",
            state.status,
            state.requests,
            state.started.elapsed().as_secs()
        )),
    ]);
    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL)),
        chunks[0],
    );

    let lines = state
        .events
        .iter()
        .map(|event| Line::from(event.as_str()))
        .collect::<Vec<_>>();
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("events (q to leave)")),
        chunks[1],
    );
}

fn draw_chart(frame: &mut ratatui::Frame, bars: &[ChartBar]) {
    let data = bars
        .iter()
        .map(|bar| {
            let color = bar.color().parse::<Color>().unwrap_or(Color::Blue);
            Bar::default()
                .value(bar.count as u64)
                .label(Line::from(bar.label.clone()))
                .style(Style::default().fg(color))
                .value_style(Style::default().fg(Color::Black).bg(color))
        })
        .collect::<Vec<_>>();
    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{TITLE} (q to close)")),
        )
        .data(BarGroup::default().bars(&data))
        .bar_width(label_width(bars))
        .bar_gap(1);
    frame.render_widget(chart, frame.area());
}

fn label_width(bars: &[ChartBar]) -> u16 {
    bars.iter()
        .map(|bar| bar.label.len())
        .max()
        .unwrap_or(3)
        .clamp(3, 16) as u16
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}
