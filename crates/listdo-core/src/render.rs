use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;

use crate::config::Config;
use crate::controller::{EditTaskView, Outcome};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_view(&self, view: &EditTaskView) -> anyhow::Result<()> {
        self.write_view(io::stdout().lock(), view)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_view_json(&self, view: &EditTaskView) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, view)?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_outcome(&self, outcome: &Outcome) -> anyhow::Result<()> {
        self.write_outcome(io::stdout().lock(), outcome)
    }

    pub fn write_view<W: Write>(&self, mut out: W, view: &EditTaskView) -> anyhow::Result<()> {
        if !view.error_message.is_empty() {
            writeln!(out, "{}", self.paint(&view.error_message, "31"))?;
        }
        if !view.loaded {
            writeln!(out, "{}", self.paint("(task not loaded)", "33"))?;
        }

        let due = if view.draft.limit_local.is_empty() {
            "-"
        } else {
            view.draft.limit_local.as_str()
        };

        writeln!(out, "list      {}", view.list_id)?;
        writeln!(out, "task      {}", view.task_id)?;
        writeln!(out, "title     {}", view.draft.title)?;
        writeln!(out, "detail    {}", view.draft.detail)?;
        writeln!(out, "done      {}", if view.draft.done { "yes" } else { "no" })?;
        writeln!(out, "due       {due}")?;
        if view.in_flight {
            writeln!(out, "{}", self.paint("submitting...", "36"))?;
        }
        Ok(())
    }

    pub fn write_outcome<W: Write>(&self, mut out: W, outcome: &Outcome) -> anyhow::Result<()> {
        match outcome {
            Outcome::Navigated(path) => writeln!(out, "{} {path}", self.paint("ok", "32"))?,
            Outcome::Failed(message) | Outcome::Rejected(message) => {
                writeln!(out, "{} {message}", self.paint("error", "31"))?
            }
            Outcome::Declined => writeln!(out, "cancelled")?,
            Outcome::Cancelled => writeln!(out, "form closed before the request finished")?,
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Draft;

    fn view() -> EditTaskView {
        EditTaskView {
            list_id: "l1".to_string(),
            task_id: "t1".to_string(),
            draft: Draft {
                title: "Buy milk".to_string(),
                detail: String::new(),
                done: true,
                limit_local: String::new(),
            },
            loaded: true,
            in_flight: false,
            error_message: "boom".to_string(),
            controls_enabled: true,
        }
    }

    #[test]
    fn writes_error_above_fields() {
        let mut buf = Vec::new();
        Renderer::plain().write_view(&mut buf, &view()).expect("render view");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "boom");
        assert!(lines.contains(&"done      yes"));
        assert!(lines.contains(&"due       -"));
    }

    #[test]
    fn writes_outcomes() {
        let mut buf = Vec::new();
        let renderer = Renderer::plain();
        renderer
            .write_outcome(&mut buf, &Outcome::Navigated("/lists/l1".to_string()))
            .expect("render outcome");
        renderer
            .write_outcome(&mut buf, &Outcome::Failed("nope".to_string()))
            .expect("render outcome");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "ok /lists/l1\nerror nope\n"
        );
    }
}
