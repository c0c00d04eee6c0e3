use chrono::{DateTime, Local};
use iced::widget::{
    button, column, container, progress_bar, row, scrollable, text, Column, Row,
};
use iced::{Alignment, Command, Element, Length, Subscription, Theme};
use lead_store::{CsvLeadLog, LeadSummary};
use mintwatch_core::{Intent, LeadRecord};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ROWS: usize = 20;
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(10);

/// Characters of lead text shown per table row.
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub leads_path: PathBuf,
    pub rows: usize,
    pub refresh: Duration,
}

impl DashboardConfig {
    pub fn new(leads_path: impl Into<PathBuf>) -> Self {
        Self {
            leads_path: leads_path.into(),
            rows: DEFAULT_ROWS,
            refresh: DEFAULT_REFRESH,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    Refresh,
    Loaded(Result<LeadSummary, String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Loading,
    Ready,
    Failed(String),
}

pub struct App {
    log: CsvLeadLog,
    rows: usize,
    refresh: Duration,
    summary: LeadSummary,
    status: Status,
    last_updated: Option<DateTime<Local>>,
}

impl App {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            log: CsvLeadLog::new(config.leads_path),
            rows: config.rows,
            refresh: config.refresh,
            summary: LeadSummary::from_records(Vec::new(), 0),
            status: Status::Loading,
            last_updated: None,
        }
    }

    pub fn summary(&self) -> &LeadSummary {
        &self.summary
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Read the lead log off the UI thread.
    pub fn load(&self) -> Command<Message> {
        let log = self.log.clone();
        let rows = self.rows;
        Command::perform(
            async move { log.load_summary(rows).await.map_err(|e| e.to_string()) },
            Message::Loaded,
        )
    }

    pub fn update(&mut self, message: Message) -> Command<Message> {
        match message {
            Message::Tick | Message::Refresh => {
                if self.status == Status::Loading && self.last_updated.is_some() {
                    return Command::none();
                }
                self.status = Status::Loading;
                self.load()
            }
            Message::Loaded(Ok(summary)) => {
                debug!("Loaded {} leads", summary.total);
                self.summary = summary;
                self.status = Status::Ready;
                self.last_updated = Some(Local::now());
                Command::none()
            }
            Message::Loaded(Err(error)) => {
                // keep showing the last good data
                warn!("Failed to load lead log: {}", error);
                self.status = Status::Failed(error);
                self.last_updated = Some(Local::now());
                Command::none()
            }
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(self.refresh).map(|_| Message::Tick)
    }

    pub fn view(&self) -> Element<Message, Theme> {
        let header = row![
            text("Mintwatch - NFT Leads").size(24).width(Length::Fill),
            button("Refresh").on_press(Message::Refresh),
        ]
        .align_items(Alignment::Center)
        .spacing(10);

        let updated = match self.last_updated {
            Some(at) => format!("Last updated: {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "Last updated: never".to_string(),
        };
        let status_line = text(format!("{} | {}", updated, status_text(&self.status))).size(12);

        let content: Element<Message, Theme> = if self.summary.is_empty() {
            column![
                text("No leads yet").size(16),
                text(format!("Waiting for rows in {}", self.log.path().display())).size(14)
            ]
            .spacing(10)
            .into()
        } else {
            column![
                text(format!("Latest {} of {} leads", self.summary.recent.len(), self.summary.total))
                    .size(18),
                self.lead_table(),
                text("Leads by intent").size(18),
                self.intent_bars(),
            ]
            .spacing(15)
            .into()
        };

        container(
            column![header, status_line, scrollable(content)]
                .spacing(20),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .padding(20)
        .into()
    }

    fn lead_table(&self) -> Element<Message, Theme> {
        let mut table = Column::new().spacing(4).push(table_row(
            ["timestamp", "type", "author", "subreddit", "intent", "text"].map(String::from),
        ));

        // newest first on screen
        for record in self.summary.recent.iter().rev() {
            table = table.push(table_row(row_cells(record)));
        }
        table.into()
    }

    fn intent_bars(&self) -> Element<Message, Theme> {
        let max = [Intent::Creation, Intent::Minting]
            .iter()
            .map(|intent| self.summary.count(*intent))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut bars = Column::new().spacing(8);
        for intent in [Intent::Creation, Intent::Minting] {
            let count = self.summary.count(intent);
            bars = bars.push(
                row![
                    text(intent.as_str()).width(Length::Fixed(90.0)),
                    progress_bar(0.0..=max as f32, count as f32).height(Length::Fixed(16.0)),
                    text(count.to_string()).width(Length::Fixed(50.0)),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }
        bars.into()
    }
}

fn status_text(status: &Status) -> String {
    match status {
        Status::Loading => "loading".to_string(),
        Status::Ready => "ok".to_string(),
        Status::Failed(error) => format!("error: {}", error),
    }
}

fn table_row<'a>(cells: [String; 6]) -> Element<'a, Message, Theme> {
    let widths = [170.0, 90.0, 130.0, 130.0, 80.0];
    let mut cells = cells.into_iter();
    let mut line = Row::new().spacing(10);
    for width in widths {
        let cell = cells.next().unwrap_or_default();
        line = line.push(text(cell).size(13).width(Length::Fixed(width)));
    }
    let rest = cells.next().unwrap_or_default();
    line.push(text(rest).size(13).width(Length::Fill))
        .into()
}

/// Display cells for one lead: timestamp, type, author, subreddit, intent, text preview.
pub fn row_cells(record: &LeadRecord) -> [String; 6] {
    [
        record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        record.kind.to_string(),
        record.author.clone(),
        record.origin.clone(),
        record.intent.to_string(),
        preview(&record.text),
    ]
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
