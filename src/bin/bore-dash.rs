use anyhow::{Context, Result};
use bore_dash::{
    ConnectionStatus, DashboardState, DashboardSummary, FeedClient, FeedConfig, Origin,
    ReconnectPolicy,
};
use chrono::{Local, Utc};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::{
    fs::File,
    io,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal dashboard for live bore tunnel metrics", long_about = None)]
struct Args {
    /// Origin of the bore server, e.g. https://bore.example.com
    /// [default: $BORE_DASH_ORIGIN or http://localhost:8080]
    #[arg(long)]
    origin: Option<String>,

    /// Delay before reconnecting after the feed drops, in milliseconds
    /// [default: $BORE_DASH_RECONNECT_MS or 3000]
    #[arg(long)]
    reconnect_ms: Option<u64>,

    /// Timeout for a single connection attempt, in milliseconds
    /// [default: $BORE_DASH_CONNECT_TIMEOUT_MS or 10000]
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Redraw interval in milliseconds
    #[arg(long, default_value_t = 250)]
    refresh_ms: u64,

    /// Print a summary line per refresh instead of drawing the dashboard
    #[arg(long)]
    plain: bool,

    /// Write logs to this file (TUI mode only; plain mode logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct App {
    state: DashboardState,
    scroll: usize,
}

impl App {
    fn new(state: DashboardState) -> Self {
        Self { state, scroll: 0 }
    }

    fn on_key(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        let rows = self
            .state
            .snapshot()
            .map(|s| s.tunnels().len())
            .unwrap_or(0);
        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
            KeyCode::Down => {
                if self.scroll < rows.saturating_sub(1) {
                    self.scroll += 1;
                }
            }
            KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(10),
            KeyCode::PageDown => self.scroll = (self.scroll + 10).min(rows.saturating_sub(1)),
            KeyCode::Home => self.scroll = 0,
            _ => {}
        }
        false
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bore_dash=info".into());

    if args.plain {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    } else if let Some(path) = &args.log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    }
    // Without a log file the TUI owns the terminal, so nothing is logged

    Ok(())
}

/// Environment first, then command-line flags on top.
fn feed_config(args: &Args) -> Result<FeedConfig> {
    let mut config = FeedConfig::from_env().context("Invalid BORE_DASH_* environment")?;
    if let Some(origin) = &args.origin {
        config.origin = Origin::parse(origin)?;
    }
    if let Some(ms) = args.reconnect_ms {
        config = config.with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(ms)));
    }
    if let Some(ms) = args.connect_timeout_ms {
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

fn status_style(status: ConnectionStatus) -> Style {
    let color = match status {
        ConnectionStatus::Connected => Color::Rgb(0, 255, 0),
        ConnectionStatus::Connecting => Color::Rgb(255, 200, 0),
        ConnectionStatus::Disconnected => Color::Rgb(120, 120, 120),
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn ui(f: &mut Frame, app: &App) {
    let summary = DashboardSummary::new(&app.state.view(), Utc::now());

    f.render_widget(
        Block::default().style(Style::default().bg(Color::Black)),
        f.size(),
    );

    let horizontal_padding = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .split(f.size());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(5), // Summary cards
            Constraint::Min(5),    // Tunnels
            Constraint::Length(3), // Footer
        ])
        .split(horizontal_padding[1]);

    render_header(f, chunks[0], &summary);
    render_cards(f, chunks[1], &summary);
    render_tunnels(f, chunks[2], &summary, app.scroll);
    render_footer(f, chunks[3], &summary);
}

fn render_header(f: &mut Frame, area: Rect, summary: &DashboardSummary) {
    let badge = match summary.status {
        ConnectionStatus::Connected => "● ",
        _ => "○ ",
    };
    let lines = vec![
        Line::from(vec![
            Span::styled(
                "Dashboard",
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("  ", Style::default()),
            Span::styled(
                format!("{}{}", badge, summary.status_label()),
                status_style(summary.status),
            ),
        ]),
        Line::from(Span::styled(
            "Real-time tunnel monitoring",
            Style::default().fg(Color::Rgb(150, 150, 150)),
        )),
    ];

    let header = Paragraph::new(lines)
        .style(Style::default().bg(Color::Black))
        .alignment(Alignment::Left);
    f.render_widget(header, area);
}

fn card<'a>(title: &'a str, value: String, detail: String) -> Paragraph<'a> {
    Paragraph::new(vec![
        Line::from(Span::styled(
            value,
            Style::default()
                .fg(Color::Rgb(0, 255, 255))
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            detail,
            Style::default().fg(Color::Rgb(150, 150, 150)),
        )),
    ])
    .block(
        Block::default()
            .title(format!(" {} ", title))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    )
    .style(Style::default().bg(Color::Black))
}

fn render_cards(f: &mut Frame, area: Rect, summary: &DashboardSummary) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(area);

    f.render_widget(
        card(
            "active tunnels",
            summary.active_tunnels.to_string(),
            summary.channels_label(),
        ),
        chunks[0],
    );
    f.render_widget(
        card(
            "throughput in",
            summary.throughput_in.clone(),
            format!("{} total", summary.cumulative_in),
        ),
        chunks[1],
    );
    f.render_widget(
        card(
            "throughput out",
            summary.throughput_out.clone(),
            format!("{} total", summary.cumulative_out),
        ),
        chunks[2],
    );
    f.render_widget(
        card(
            "total traffic",
            summary.throughput_total.clone(),
            format!("{} total", summary.cumulative_total),
        ),
        chunks[3],
    );
}

fn render_tunnels(f: &mut Frame, area: Rect, summary: &DashboardSummary, scroll: usize) {
    let block = Block::default()
        .title(format!(" tunnels ({}) ", summary.active_tunnels))
        .borders(Borders::ALL)
        .border_style(
            Style::default()
                .fg(Color::Rgb(255, 0, 128))
                .add_modifier(Modifier::BOLD),
        );

    if summary.rows.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "No active tunnels",
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                "Tunnels will appear here when clients connect",
                Style::default().fg(Color::Rgb(100, 100, 100)),
            )),
        ])
        .alignment(Alignment::Center)
        .block(block)
        .style(Style::default().bg(Color::Black));
        f.render_widget(empty, area);
        return;
    }

    let header = Row::new(
        ["ID", "URL", "PORT", "UPTIME", "CHANNELS", "IN", "OUT"]
            .into_iter()
            .map(|h| Cell::from(h).style(Style::default().fg(Color::Yellow))),
    );

    let rows = summary.rows.iter().skip(scroll).map(|row| {
        let channel_style = if row.channels > 0 {
            Style::default()
                .fg(Color::Rgb(0, 255, 0))
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Rgb(100, 100, 100))
        };
        Row::new(vec![
            Cell::from(row.id.clone()).style(Style::default().fg(Color::White)),
            Cell::from(row.url.clone()).style(Style::default().fg(Color::Cyan)),
            Cell::from(row.port.clone()).style(Style::default().fg(Color::Rgb(150, 150, 150))),
            Cell::from(row.uptime.clone()).style(Style::default().fg(Color::Rgb(150, 150, 150))),
            Cell::from(row.channels.to_string()).style(channel_style),
            Cell::from(format!("{} ({})", row.rate_in, row.total_in)),
            Cell::from(format!("{} ({})", row.rate_out, row.total_out)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Min(24),
            Constraint::Length(6),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(24),
            Constraint::Length(24),
        ],
    )
    .header(header)
    .block(block)
    .style(Style::default().bg(Color::Black));
    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, area: Rect, summary: &DashboardSummary) {
    let line = if let Some(error) = &summary.error {
        Line::from(vec![
            Span::styled(
                "⚠ ERROR: ",
                Style::default()
                    .fg(Color::Red)
                    .bg(Color::Rgb(50, 0, 0))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(error.clone(), Style::default().fg(Color::Rgb(255, 100, 100))),
        ])
    } else {
        Line::from(vec![
            Span::styled(
                format!("[{}] ", Local::now().format("%H:%M:%S")),
                Style::default()
                    .fg(Color::Rgb(100, 255, 100))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                "[q]",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" quit  ", Style::default().fg(Color::White)),
            Span::styled(
                "[↑↓]",
                Style::default()
                    .fg(Color::Rgb(255, 165, 0))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" scroll  ", Style::default().fg(Color::White)),
            Span::styled(
                "[home]",
                Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" top", Style::default().fg(Color::White)),
            Span::styled(
                summary
                    .last_update
                    .as_deref()
                    .map(|age| format!("  updated {} ago", age))
                    .unwrap_or_else(|| "  waiting for data".to_string()),
                Style::default().fg(Color::Rgb(150, 150, 150)),
            ),
        ])
    };

    let footer = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Rgb(0, 200, 100))),
        )
        .style(Style::default().bg(Color::Black))
        .alignment(Alignment::Center);
    f.render_widget(footer, area);
}

fn run_tui(state: DashboardState, refresh: Duration) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(state);
    let mut last_tick = Instant::now();

    let result = (|| -> Result<()> {
        loop {
            terminal.draw(|f| ui(f, &app))?;

            let timeout = refresh
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && app.on_key(key.code, key.modifiers) {
                        return Ok(());
                    }
                }
            }

            if last_tick.elapsed() >= refresh {
                last_tick = Instant::now();
            }
        }
    })();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_plain(state: DashboardState, refresh: Duration) {
    let mut interval = tokio::time::interval(refresh);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = DashboardSummary::new(&state.view(), Utc::now());
                info!(
                    "{} | tunnels: {} | {} | in: {} ({} total) | out: {} ({} total) | updated: {}{}",
                    summary.status_label(),
                    summary.active_tunnels,
                    summary.channels_label(),
                    summary.throughput_in,
                    summary.cumulative_in,
                    summary.throughput_out,
                    summary.cumulative_out,
                    summary
                        .last_update
                        .as_deref()
                        .map(|age| format!("{} ago", age))
                        .unwrap_or_else(|| "never".to_string()),
                    summary
                        .error
                        .as_deref()
                        .map(|e| format!(" | error: {}", e))
                        .unwrap_or_default(),
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = feed_config(&args)?;
    let refresh = Duration::from_millis(args.refresh_ms.max(10));
    info!("Connecting to dashboard feed at {}", config.feed_url());

    let runtime = tokio::runtime::Runtime::new()?;
    let (state, writer) = DashboardState::new();
    let client = {
        let _guard = runtime.enter();
        FeedClient::spawn(config, writer)
    };

    let result = if args.plain {
        runtime.block_on(run_plain(state, refresh));
        Ok(())
    } else {
        run_tui(state, refresh)
    };

    runtime.block_on(client.shutdown());
    result
}
