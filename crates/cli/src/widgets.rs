use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap};
use unicode_width::UnicodeWidthStr;

use oxidiana_core::registry::{Speaker, icon_for};
use oxidiana_core::status::effective_accent;
use oxidiana_core::types::{LogKind, MessageRole, ThemePalette};
use oxidiana_llm::provider::StreamChunk;

use crate::tui::{App, View};

/// Convert `tui_markdown` output (ratatui-core types) into ratatui 0.29 types.
fn md_to_lines(content: &str, base: Style) -> Vec<Line<'static>> {
    let rendered = tui_markdown::from_str(content);
    rendered
        .lines
        .into_iter()
        .map(|line| {
            let spans: Vec<Span<'static>> = line
                .spans
                .into_iter()
                .map(|s| Span::styled(s.content.into_owned(), base.patch(convert_style(s.style))))
                .collect();
            Line::from(spans)
        })
        .collect()
}

fn convert_style(s: ratatui_core::style::Style) -> Style {
    let mut out = Style::default();
    if let Some(c) = s.fg {
        out.fg = Some(convert_color(c));
    }
    if let Some(c) = s.bg {
        out.bg = Some(convert_color(c));
    }
    out.add_modifier = Modifier::from_bits_truncate(s.add_modifier.bits());
    out.sub_modifier = Modifier::from_bits_truncate(s.sub_modifier.bits());
    out
}

fn convert_color(c: ratatui_core::style::Color) -> Color {
    use ratatui_core::style::Color as C;
    match c {
        C::Reset => Color::Reset,
        C::Black => Color::Black,
        C::Red => Color::Red,
        C::Green => Color::Green,
        C::Yellow => Color::Yellow,
        C::Blue => Color::Blue,
        C::Magenta => Color::Magenta,
        C::Cyan => Color::Cyan,
        C::Gray => Color::Gray,
        C::DarkGray => Color::DarkGray,
        C::LightRed => Color::LightRed,
        C::LightGreen => Color::LightGreen,
        C::LightYellow => Color::LightYellow,
        C::LightBlue => Color::LightBlue,
        C::LightMagenta => Color::LightMagenta,
        C::LightCyan => Color::LightCyan,
        C::White => Color::White,
        C::Rgb(r, g, b) => Color::Rgb(r, g, b),
        C::Indexed(i) => Color::Indexed(i),
    }
}

// ── Palette ──

/// `#rgb`, `#rrggbb` or `#rrggbbaa` to a terminal color (alpha ignored).
/// Anything else is `Reset`.
pub fn hex_color(hex: &str) -> Color {
    let h = hex.trim().trim_start_matches('#');
    let h = if h.len() == 3 { h.chars().flat_map(|c| [c, c]).collect() } else { h.to_owned() };
    let channel = |i: usize| h.get(i..i + 2).and_then(|s| u8::from_str_radix(s, 16).ok());
    match (h.len(), channel(0), channel(2), channel(4)) {
        (6 | 8, Some(r), Some(g), Some(b)) => Color::Rgb(r, g, b),
        _ => Color::Reset,
    }
}

/// Resolved colors for one frame.
struct Colors {
    bg: Color,
    panel: Color,
    border: Color,
    accent: Color,
    text: Color,
    dim: Color,
}

impl Colors {
    fn new(palette: &ThemePalette, accent: &str) -> Self {
        Self {
            bg: hex_color(palette.bg),
            panel: hex_color(palette.panel),
            border: hex_color(palette.border),
            accent: hex_color(accent),
            text: hex_color(palette.text),
            dim: hex_color(palette.dim),
        }
    }

    fn block(&self, title: &str) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.border))
            .title(Span::styled(format!(" {title} "), Style::default().fg(self.accent).bold()))
            .style(Style::default().bg(self.panel).fg(self.text))
    }
}

// ── Glitch ──

const GLITCH_GLYPHS: &[char] = &['▓', '▒', '░', '#', '%', '@', '¥', '§'];

/// Whether `frame` falls in a glitch burst. Higher `timing` means more frequent bursts.
pub fn glitch_active(frame: usize, timing: f32) -> bool {
    let period = 4 + ((1.0 - timing.clamp(0.0, 1.0)) * 36.0) as usize;
    frame % period < 2
}

/// Corrupt a share of `text` proportional to `intensity`, deterministic per frame.
pub fn glitch_text(text: &str, intensity: f32, frame: usize) -> String {
    if intensity <= 0.0 {
        return text.to_owned();
    }
    let threshold = (intensity.clamp(0.0, 1.0) * 100.0) as usize;
    text.chars()
        .enumerate()
        .map(|(i, c)| {
            let h = (i.wrapping_mul(31) ^ frame.wrapping_mul(17)).wrapping_mul(2_654_435_761) % 100;
            if c != ' ' && h < threshold / 3 {
                GLITCH_GLYPHS[h % GLITCH_GLYPHS.len()]
            } else {
                c
            }
        })
        .collect()
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub fn draw(f: &mut Frame, app: &App) {
    let status = &app.snapshot.status;
    let colors = Colors::new(status.theme.palette(), effective_accent(status));
    f.render_widget(Block::default().style(Style::default().bg(colors.bg)), f.area());

    if app.snapshot.locked {
        draw_purge(f, app, &colors);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, &colors, chunks[0]);
    draw_tabs(f, app, &colors, chunks[1]);
    match app.view {
        View::Chat => draw_chat(f, app, &colors, chunks[2]),
        View::Agents => draw_agents(f, app, &colors, chunks[2]),
        View::Grimoire => draw_grimoire(f, app, &colors, chunks[2]),
        View::Memory => draw_memory(f, app, &colors, chunks[2]),
        View::Reasoning => draw_reasoning(f, app, &colors, chunks[2]),
    }
    draw_input(f, app, &colors, chunks[3]);
    draw_status(f, app, &colors, chunks[4]);
}

fn draw_header(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let status = &app.snapshot.status;
    let mut title = String::from("BIOMA OXIDIANA // SISTEMA_2");
    if glitch_active(app.anim_frame, status.glitch_timing) {
        title = glitch_text(&title, status.glitch_intensity, app.anim_frame);
    }
    let mode = if status.is_gestalt() { "GESTALT" } else { "SINGULAR" };
    let line = Line::from(vec![
        Span::styled(format!(" {title} "), Style::default().fg(c.accent).bold()),
        Span::styled(
            format!(" {} │ {} │ {}", status.layer, mode, status.theme.palette().name),
            Style::default().fg(c.dim),
        ),
    ]);
    f.render_widget(Paragraph::new(line).style(Style::default().bg(c.bg)), area);
}

fn draw_tabs(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let mut spans = Vec::new();
    for v in View::ALL {
        let style = if v == app.view {
            Style::default().fg(c.bg).bg(c.accent).bold()
        } else {
            Style::default().fg(c.dim)
        };
        spans.push(Span::styled(format!(" {} ", v.title()), style));
        spans.push(Span::raw(" "));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_purge(f: &mut Frame, app: &App, c: &Colors) {
    let area = f.area();
    let lines = vec![
        Line::default(),
        Line::from(Span::styled(
            glitch_text("SISTEMA PURGADO", 0.6, app.anim_frame),
            Style::default().fg(c.accent).bold(),
        )),
        Line::from(Span::styled("ESTADO KAFE // TERMINATE_ALL", Style::default().fg(c.dim))),
        Line::default(),
        Line::from(Span::styled("/reboot para reiniciar", Style::default().fg(c.text))),
    ];
    let h = (lines.len() as u16 + 2).min(area.height);
    let y = area.y + area.height.saturating_sub(h) / 2;
    let rect = Rect::new(area.x, y, area.width, h);
    f.render_widget(Clear, rect);
    f.render_widget(Paragraph::new(lines).alignment(Alignment::Center).block(c.block("PURGA")), rect);

    // The input row stays usable so /reboot can be typed.
    let input = Rect::new(area.x, area.bottom().saturating_sub(3), area.width, 3.min(area.height));
    draw_input(f, app, c, input);
}

fn draw_status(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let snap = &app.snapshot;
    let mut spans = Vec::new();
    if snap.busy {
        let frame = SPINNER[app.anim_frame % SPINNER.len()];
        spans.push(Span::styled(format!(" {frame} procesando "), Style::default().fg(c.accent)));
    }
    if snap.blocked {
        spans.push(Span::styled(" BLOQUEADO ", Style::default().fg(c.bg).bg(c.accent)));
    }
    if let Some(id) = &snap.now_playing {
        spans.push(Span::styled(format!(" ♪ {id} "), Style::default().fg(c.accent)));
    }
    if let Some(n) = app.notices.last() {
        spans.push(Span::styled(format!(" {n}"), Style::default().fg(c.dim)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_input(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let prefix = "> ";
    let inner_w = area.width.saturating_sub(2) as usize;
    let before_cursor = &app.input[..app.cursor];
    let cursor_w = prefix.width() + before_cursor.width();
    let hscroll = cursor_w.saturating_sub(inner_w.saturating_sub(1));

    let line = Line::from(vec![
        Span::styled(prefix, Style::default().fg(c.accent)),
        Span::raw(app.input.as_str()),
    ]);
    let para = Paragraph::new(line)
        .block(c.block("ENTRADA"))
        .scroll((0, hscroll as u16));
    f.render_widget(para, area);
    f.set_cursor_position(Position::new(
        area.x + 1 + (cursor_w - hscroll) as u16,
        area.y + 1,
    ));
}

fn speaker_style(speaker: &Speaker<'_>, c: &Colors) -> Style {
    let fg = speaker.color().map(hex_color).unwrap_or(c.accent);
    Style::default().fg(fg).bold()
}

fn draw_chat(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for (i, msg) in app.snapshot.messages.iter().enumerate() {
        if !lines.is_empty() {
            lines.push(Line::default());
        }
        let stamp = msg.timestamp.format("%H:%M:%S").to_string();
        let index = Span::styled(format!("[{}] ", i + 1), Style::default().fg(c.dim));
        match msg.role {
            MessageRole::User => {
                lines.push(Line::from(vec![
                    index,
                    Span::styled("OPERADOR", Style::default().fg(c.text).bold()),
                    Span::styled(format!("  {stamp}"), Style::default().fg(c.dim)),
                ]));
                lines.push(Line::from(vec![Span::raw("> "), Span::raw(msg.text.as_str())]));
            }
            MessageRole::Model => {
                let speaker = app.registry.resolve(msg.agent_id.as_deref());
                let playing = app.snapshot.now_playing.as_deref() == Some(msg.id.as_str());
                lines.push(Line::from(vec![
                    index,
                    Span::styled(speaker.name().to_owned(), speaker_style(&speaker, c)),
                    Span::styled(format!("  {stamp}"), Style::default().fg(c.dim)),
                    Span::styled(if playing { "  ♪" } else { "" }, Style::default().fg(c.accent)),
                ]));
                lines.extend(md_to_lines(&msg.text, Style::default().fg(c.text)));
                for g in &msg.grounding {
                    if let Some(web) = &g.web {
                        let label = if web.title.is_empty() { &web.uri } else { &web.title };
                        lines.push(Line::from(Span::styled(
                            format!("  ↳ {label} ({})", web.uri),
                            Style::default().fg(c.dim).italic(),
                        )));
                    }
                    if let Some(maps) = &g.maps {
                        lines.push(Line::from(Span::styled(
                            format!("  ⌖ {}", maps.uri),
                            Style::default().fg(c.dim).italic(),
                        )));
                    }
                }
            }
            MessageRole::System => {
                lines.push(Line::from(vec![
                    index,
                    Span::styled(format!("⚠ {}", msg.text), Style::default().fg(c.accent).bold()),
                ]));
            }
        }
    }
    if app.snapshot.busy {
        let frame = SPINNER[app.anim_frame % SPINNER.len()];
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(format!("{frame} sintetizando..."), Style::default().dim())));
    }

    let inner_w = area.width.saturating_sub(2) as usize;
    let wrapped_total: u16 = lines.iter().map(|l| wrapped_line_count(l, inner_w)).sum();
    let visible = area.height.saturating_sub(2);
    let scroll = wrapped_total.saturating_sub(visible).saturating_sub(app.scroll_offset);

    let para = Paragraph::new(lines)
        .block(c.block(app.view.title()))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(para, area);
}

fn draw_agents(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let status = &app.snapshot.status;
    let items: Vec<ListItem> = app
        .snapshot
        .personas
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let active = status.is_active(&p.id);
            let marker = if active { "●" } else { "○" };
            let base = if i == app.selected_agent {
                Style::default().bg(c.border)
            } else {
                Style::default()
            };
            let header = Line::from(vec![
                Span::styled(format!(" {marker} "), Style::default().fg(c.accent)),
                Span::styled(format!("{} ", icon_for(p).glyph()), Style::default().fg(hex_color(&p.color))),
                Span::styled(p.name.clone(), Style::default().fg(hex_color(&p.color)).bold()),
                Span::styled(format!("  [{}]  {}", p.id, p.role), Style::default().fg(c.dim)),
            ]);
            let detail = Line::from(Span::styled(
                format!(
                    "     {:?} · {:?} · sintropía {:.2} · entropía {:.2} · voz {} {:.1}/{:.1}",
                    p.access_level,
                    p.status,
                    p.cognitive.syntropy,
                    p.cognitive.entropy,
                    p.voice_config.voice_name.as_str(),
                    p.voice_config.pitch,
                    p.voice_config.rate,
                ),
                Style::default().fg(c.dim),
            ));
            ListItem::new(vec![header, detail]).style(base)
        })
        .collect();
    let hint = "↑↓ seleccionar · Enter enfocar · /gestalt <id> · /kill <id> · /inject <archivo>";
    f.render_widget(List::new(items).block(c.block(hint)), area);
}

fn log_color(kind: LogKind, c: &Colors) -> Color {
    match kind {
        LogKind::Cognitive => c.text,
        LogKind::Sistemico => c.dim,
        LogKind::Ejecucion => c.accent,
        LogKind::Inyeccion => Color::LightGreen,
    }
}

fn draw_grimoire(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(38), Constraint::Min(10)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(cols[0]);

    let status = &app.snapshot.status;
    let ratio = (status.integrity / 100.0).clamp(0.0, 1.0) as f64;
    let gauge = Gauge::default()
        .block(c.block("INTEGRIDAD"))
        .gauge_style(Style::default().fg(c.accent).bg(c.panel))
        .ratio(ratio)
        .label(format!("{:.1}%", status.integrity));
    f.render_widget(gauge, left[0]);

    let row = |k: &str, v: String| {
        Line::from(vec![
            Span::styled(format!("{k:<10}"), Style::default().fg(c.dim)),
            Span::styled(v, Style::default().fg(c.text)),
        ])
    };
    let vitals = vec![
        row("capa", status.layer.clone()),
        row("acento", status.accent_color.clone()),
        row("glitch", format!("{:.2}", status.glitch_intensity)),
        row("ritmo", format!("{:.2}", status.glitch_timing)),
        row("fuente", format!("{:?}", status.preferred_font)),
        row("tema", status.theme.palette().name.to_owned()),
        row("activos", status.active_agent_ids.join(", ")),
        row("enlace", app.snapshot.exchange.as_str().to_owned()),
    ];
    f.render_widget(Paragraph::new(vitals).block(c.block("ESTADO")).wrap(Wrap { trim: true }), left[1]);

    let items: Vec<ListItem> = app
        .snapshot
        .logs
        .iter()
        .map(|e| {
            ListItem::new(Line::from(vec![
                Span::styled(e.timestamp.format("%H:%M:%S ").to_string(), Style::default().fg(c.dim)),
                Span::styled(format!("{:<10} ", e.kind.as_str()), Style::default().fg(log_color(e.kind, c))),
                Span::raw(e.content.as_str()),
            ]))
        })
        .collect();
    f.render_widget(List::new(items).block(c.block("REGISTRO")), cols[1]);
}

fn draw_memory(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let items: Vec<ListItem> = app
        .snapshot
        .memories
        .iter()
        .map(|m| {
            ListItem::new(vec![
                Line::from(vec![
                    Span::styled(m.id.clone(), Style::default().fg(c.accent)),
                    Span::styled(m.timestamp.format("  %Y-%m-%d %H:%M").to_string(), Style::default().fg(c.dim)),
                ]),
                Line::from(Span::raw(format!("  {}", m.content))),
            ])
        })
        .collect();
    f.render_widget(List::new(items).block(c.block("MEMORIA · /remember · /forget <id>")), area);
}

fn draw_reasoning(f: &mut Frame, app: &App, c: &Colors, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(app.gallery.len().min(6) as u16 + 2)])
        .split(area);

    let mut lines: Vec<Line> = Vec::new();
    if app.stream.is_empty() && !app.snapshot.reasoning.is_empty() {
        lines.extend(md_to_lines(&app.snapshot.reasoning, Style::default().fg(c.text)));
    }
    for chunk in &app.stream {
        match chunk {
            StreamChunk::Text(t) => lines.extend(md_to_lines(t, Style::default().fg(c.text))),
            StreamChunk::Code(code) => {
                for l in code.lines() {
                    lines.push(Line::from(Span::styled(format!("│ {l}"), Style::default().fg(c.accent))));
                }
            }
            StreamChunk::Output(out) => {
                for l in out.lines() {
                    lines.push(Line::from(Span::styled(format!("» {l}"), Style::default().fg(c.dim))));
                }
            }
        }
    }
    let inner_w = rows[0].width.saturating_sub(2) as usize;
    let total: u16 = lines.iter().map(|l| wrapped_line_count(l, inner_w)).sum();
    let scroll = total
        .saturating_sub(rows[0].height.saturating_sub(2))
        .saturating_sub(app.scroll_offset);
    f.render_widget(
        Paragraph::new(lines)
            .block(c.block("RAZONAMIENTO · /reason <texto>"))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0)),
        rows[0],
    );

    let images: Vec<ListItem> = app
        .gallery
        .iter()
        .take(6)
        .map(|p| ListItem::new(Span::styled(p.display().to_string(), Style::default().fg(c.dim))))
        .collect();
    f.render_widget(List::new(images).block(c.block("IMÁGENES · /image [ratio] <prompt>")), rows[1]);
}

/// How many visual rows a Line occupies when wrapped to `width` columns.
fn wrapped_line_count(line: &Line, width: usize) -> u16 {
    if width == 0 {
        return 1;
    }
    let full: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
    full.split('\n').map(|sub| greedy_wrap_rows(sub, width)).sum()
}

/// Visual rows for one unwrapped segment, placing chars greedily.
fn greedy_wrap_rows(s: &str, width: usize) -> u16 {
    if width == 0 {
        return 1;
    }
    let mut rows: u16 = 1;
    let mut col: usize = 0;
    for ch in s.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if cw == 0 {
            continue;
        }
        if col + cw > width {
            rows += 1;
            col = cw;
        } else {
            col += cw;
        }
    }
    rows
}
