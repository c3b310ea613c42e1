use std::io::{
  BufRead,
  Write
};

/// Blocking yes/no prompt.
pub trait Confirm {
  fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct PresetConfirm(pub bool);

impl Confirm for PresetConfirm {
  fn confirm(&self, prompt: &str) -> bool {
    tracing::debug!(
      prompt,
      answer = self.0,
      "preset confirmation"
    );
    self.0
  }
}

/// Asks on a line-oriented terminal.
/// Anything but `y`/`yes` declines.
pub struct TerminalConfirm<R, W> {
  input:  parking_lot::Mutex<R>,
  output: parking_lot::Mutex<W>
}

impl<R, W> TerminalConfirm<R, W>
where
  R: BufRead,
  W: Write
{
  pub fn new(input: R, output: W) -> Self {
    Self {
      input:  parking_lot::Mutex::new(
        input
      ),
      output: parking_lot::Mutex::new(
        output
      )
    }
  }
}

impl<R, W> Confirm for TerminalConfirm<R, W>
where
  R: BufRead,
  W: Write
{
  fn confirm(&self, prompt: &str) -> bool {
    {
      let mut out = self.output.lock();
      if write!(out, "{prompt} [y/N] ")
        .and_then(|()| out.flush())
        .is_err()
      {
        tracing::warn!(
          "failed writing confirmation \
           prompt"
        );
        return false;
      }
    }

    let mut answer = String::new();
    match self
      .input
      .lock()
      .read_line(&mut answer)
    {
      | Ok(_) => {
        matches!(
          answer
            .trim()
            .to_ascii_lowercase()
            .as_str(),
          "y" | "yes"
        )
      }
      | Err(err) => {
        tracing::warn!(
          error = %err,
          "failed reading confirmation"
        );
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;

  #[test]
  fn terminal_confirm_accepts_yes_only() {
    let yes = TerminalConfirm::new(
      Cursor::new(b"Yes\n".to_vec()),
      Vec::new()
    );
    assert!(yes.confirm("Delete?"));

    let blank = TerminalConfirm::new(
      Cursor::new(b"\n".to_vec()),
      Vec::new()
    );
    assert!(!blank.confirm("Delete?"));

    let eof = TerminalConfirm::new(
      Cursor::new(Vec::new()),
      Vec::new()
    );
    assert!(!eof.confirm("Delete?"));
  }

  #[test]
  fn terminal_confirm_writes_prompt() {
    let confirm = TerminalConfirm::new(
      Cursor::new(b"n\n".to_vec()),
      Vec::new()
    );
    assert!(!confirm.confirm("Sure?"));
    assert_eq!(
      confirm.output.lock().as_slice(),
      b"Sure? [y/N] "
    );
  }
}
