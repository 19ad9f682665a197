use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::{
    io,
    time::{Duration, Instant},
};

use crescendo::{
    gui::GuiError,
    presence::{FusionConfig, PresenceFusion, PresenceVerdict},
    sensor_reader::{SensorSnapshot, SharedSensorState},
    telemetry::TargetStatus,
};

struct App {
    source: String,
    state: SharedSensorState,
    snapshot: SensorSnapshot,
    fusion: PresenceFusion,
    fusion_interval: Duration,
    last_fusion: Option<Instant>,
    verdict: PresenceVerdict,
}

impl App {
    fn new(
        source: String,
        state: SharedSensorState,
        fusion: FusionConfig,
        fusion_interval: Duration,
    ) -> App {
        App {
            source,
            state,
            snapshot: SensorSnapshot::default(),
            fusion: PresenceFusion::new(fusion),
            fusion_interval,
            last_fusion: None,
            verdict: PresenceVerdict::default(),
        }
    }

    fn on_tick(&mut self) {
        self.snapshot = self.state.snapshot();

        // Fusion runs at the control loop's pace, not the redraw rate, so the
        // verdict shown is the one the player would act on.
        let now = Instant::now();
        let due = self
            .last_fusion
            .map(|last| now.duration_since(last) >= self.fusion_interval)
            .unwrap_or(true);
        if due {
            self.verdict = self.fusion.step(self.snapshot.reading.as_deref(), now);
            self.last_fusion = Some(now);
        }
    }
}

pub fn engage_gui(
    source: String,
    state: SharedSensorState,
    fusion: FusionConfig,
    fusion_interval: Duration,
) -> Result<(), GuiError> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let tick_rate = Duration::from_millis(250);
    let app = App::new(source, state, fusion, fusion_interval);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(res?)
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    app.on_tick();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let KeyCode::Char('q') | KeyCode::Esc = key.code {
                        return Ok(());
                    }
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn status_color(status: TargetStatus) -> Color {
    match status {
        TargetStatus::None => Color::DarkGray,
        TargetStatus::Moving => Color::Yellow,
        TargetStatus::Stationary => Color::Cyan,
        TargetStatus::Both => Color::Green,
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "yes"
    } else {
        "no"
    }
}

fn ui(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(9),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
        ])
        .split(f.size());

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[0]);

    render_reading(f, app, top[0]);
    render_presence(f, app, top[1]);

    let reading = app.snapshot.reading.as_deref();
    let move_energy = reading.map(|r| r.move_energy).unwrap_or(0);
    let static_energy = reading.map(|r| r.static_energy).unwrap_or(0);
    f.render_widget(energy_gauge(" Move energy ", move_energy, Color::Yellow), rows[1]);
    f.render_widget(
        energy_gauge(" Static energy ", static_energy, Color::Cyan),
        rows[2],
    );

    render_gates(f, app, rows[3]);
}

fn render_reading(f: &mut Frame, app: &App, area: Rect) {
    let snapshot = &app.snapshot;
    let age = snapshot
        .updated_at
        .map(|at| format!("{:.1} s ago", at.elapsed().as_secs_f32()))
        .unwrap_or_else(|| "never".into());

    let mut lines = vec![
        Line::from(format!("Source:     {}", app.source)),
        Line::from(format!(
            "Connected:  {}   Frames: {}   Last: {}",
            flag(snapshot.connected),
            snapshot.frames_decoded,
            age
        )),
    ];
    match snapshot.reading.as_deref() {
        Some(r) => {
            lines.push(Line::from(Span::styled(
                format!("Status:     {}", r.status),
                Style::default().fg(status_color(r.status)),
            )));
            lines.push(Line::from(format!(
                "Moving:     {} cm",
                r.move_distance_cm
            )));
            lines.push(Line::from(format!(
                "Stationary: {} cm",
                r.static_distance_cm
            )));
            lines.push(Line::from(format!(
                "Detection:  {} cm",
                r.detection_distance_cm
            )));
        }
        None => lines.push(Line::from("Waiting for the sensor...".dark_gray())),
    }

    let block = Block::default()
        .title(" Sensor ".magenta().bold())
        .borders(Borders::ALL);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_presence(f: &mut Frame, app: &App, area: Rect) {
    let v = &app.verdict;
    let window = app.fusion.window();
    let robust = if v.robust {
        "PRESENT".green().bold()
    } else {
        "absent".dark_gray()
    };
    let hold = window
        .active_until()
        .map(|until| until.saturating_duration_since(Instant::now()))
        .filter(|left| !left.is_zero())
        .map(|left| format!("{} s", left.as_secs()))
        .unwrap_or_else(|| "-".into());

    let lines = vec![
        Line::from(vec!["Robust:     ".into(), robust]),
        Line::from(format!("Dynamic:    {}", flag(v.dynamic))),
        Line::from(format!("Stationary: {}", flag(v.stationary))),
        Line::from(format!("In window:  {}", window.len())),
        Line::from(format!("Hold left:  {}", hold)),
        Line::from(" <Q> quit ".dark_gray()),
    ];
    let block = Block::default()
        .title(" Presence ".magenta().bold())
        .borders(Borders::ALL);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn energy_gauge(title: &str, energy: u8, color: Color) -> Gauge<'_> {
    Gauge::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .percent(u16::from(energy.min(100)))
}

fn render_gates(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Gate energies (move / static) ".magenta().bold())
        .borders(Borders::ALL);

    let Some(eng) = app
        .snapshot
        .reading
        .as_deref()
        .and_then(|r| r.engineering.as_ref())
    else {
        let hint = Paragraph::new("No engineering data. Start with --engineering.".dark_gray())
            .block(block);
        f.render_widget(hint, area);
        return;
    };

    let groups: Vec<BarGroup> = eng
        .gates
        .iter()
        .map(|gate| {
            BarGroup::default()
                .label(Line::from(format!("{:.2}m", gate.distance_m)))
                .bars(&[
                    Bar::default()
                        .value(u64::from(gate.move_energy))
                        .style(Style::default().fg(Color::Yellow)),
                    Bar::default()
                        .value(u64::from(gate.static_energy))
                        .style(Style::default().fg(Color::Cyan)),
                ])
        })
        .collect();

    let mut chart = BarChart::default()
        .block(block)
        .bar_width(3)
        .bar_gap(0)
        .group_gap(2)
        .max(100);
    for group in groups {
        chart = chart.data(group);
    }
    f.render_widget(chart, area);
}
