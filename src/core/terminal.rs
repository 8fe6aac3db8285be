use console::{Emoji, style};

use crate::core::job::{LogEntry, LogLevel, ResultView, StatusView};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        ROCKET,
        style("demoforge").bold().magenta()
    );
    println!(
        "{}\n",
        style("Tailored data analytics demos from a company URL.").cyan()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Blank,
}

/// A titled block of help or status lines.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        println!(" {}", style(&self.title).bold().underlined());
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command(name, _) => Some(name.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        for line in &self.lines {
            match line {
                GuideLine::Command(name, description) => println!(
                    "   {}  {}",
                    style(format!("{:<width$}", name, width = width)).green(),
                    style(description).dim()
                ),
                GuideLine::Status(label, value) => {
                    println!("   {} {}", style(format!("{}:", label)).bold(), value)
                }
                GuideLine::Blank => println!(),
            }
        }
        println!();
    }
}

/// One job log line, coloured by level.
pub fn print_log_entry(entry: &LogEntry) {
    let stage = style(format!("[{}]", entry.stage)).dim();
    let time = entry.timestamp.format("%H:%M:%S");
    match entry.level {
        LogLevel::Error => println!("  {} {} {}", time, stage, style(&entry.message).red()),
        LogLevel::Warning => println!("  {} {} {}", time, stage, style(&entry.message).yellow()),
        LogLevel::Info => println!("  {} {} {}", time, stage, entry.message),
        LogLevel::Debug => println!("  {} {} {}", time, stage, style(&entry.message).dim()),
    }
}

pub fn print_progress(view: &StatusView) {
    let stage = view
        .current_stage
        .map(|s| s.as_str())
        .unwrap_or("-");
    println!(
        "{} {} {}",
        style(format!("[{:>3}%]", view.progress_percentage)).bold().cyan(),
        style(view.phase).bold(),
        style(stage).dim()
    );
}

pub fn print_result(result: &ResultView) {
    print_success(&format!("Demo ready for {}", result.company_name));
    print_status("Source", &result.source_url);
    print_status("Dataset", &result.provisioned_resource_id);
    print_status("Agent", &result.conversational_agent_id);
    let tables: Vec<&str> = result.schema.iter().map(|t| t.name.as_str()).collect();
    print_status("Tables", &tables.join(", "));

    println!();
    print_step(&result.narrative_script.title);
    for point in &result.narrative_script.talking_points {
        println!("   • {}", point);
    }

    println!();
    print_step("Golden queries");
    for (i, query) in result.golden_queries.iter().enumerate() {
        println!("   {}. {}", i + 1, style(&query.question).bold());
        if !query.sql.is_empty() {
            println!("      {}", style(&query.sql).dim());
        }
    }
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Bye from demoforge.").bold().cyan());
}
